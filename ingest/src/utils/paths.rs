use crate::partition::PartitionKey;

/// Renders object keys for fact partitions and dimension artifacts.
///
/// Templates use `{dataset}`, `{year}`, `{month}` and `{day}`; month and day
/// always render as two digits so `mes=03`, never `mes=3`.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    root: String,
    dataset: String,
    template: String,
}

impl PathBuilder {
    pub fn new(template: &str, dataset: &str) -> Self {
        Self {
            root: String::new(),
            dataset: dataset.to_string(),
            template: template.to_string(),
        }
    }

    pub fn with_root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    pub fn build_partition_path(&self, key: &PartitionKey) -> String {
        let relative = self
            .template
            .replace("{dataset}", &self.dataset)
            .replace("{year}", &key.year.to_string())
            .replace("{month}", &format!("{:02}", key.month))
            .replace("{day}", &format!("{:02}", key.day));
        join_key(&self.root, &relative)
    }

    /// Common prefix of every partition of this dataset, up to the first date placeholder.
    pub fn build_dataset_prefix(&self) -> String {
        let head = self
            .template
            .split("{year}")
            .next()
            .unwrap_or_default()
            .replace("{dataset}", &self.dataset);
        let head = match head.rfind('/') {
            Some(idx) => &head[..=idx],
            None => "",
        };
        join_key(&self.root, head)
    }
}

/// `dimensao/<name>/<name>.parquet` under `root`.
pub fn dimension_path(root: &str, artifact_name: &str) -> String {
    join_key(
        root,
        &format!("dimensao/{}/{}.parquet", artifact_name, artifact_name),
    )
}

pub fn join_key(root: &str, key: &str) -> String {
    let root = root.trim_matches('/');
    let key = key.trim_start_matches('/');
    if root.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", root, key)
    }
}
