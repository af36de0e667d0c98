use std::path::PathBuf;

use typed_builder::TypedBuilder;

/// Where and how a run reads and writes its files.
///
/// # Example
/// ```
/// use mdd::Config;
///
/// let config = Config::builder().data_dir("/tmp/mdd".into()).build();
/// assert_eq!(config.framed_port, 1);
/// assert_eq!(config.checkpoint_path(), std::path::Path::new("/tmp/mdd/mdd.json"));
/// ```
#[derive(TypedBuilder, Debug, Clone)]
pub struct Config {
    /// Directory holding reassembled node files, demultiplexed outputs, the
    /// checkpoint and request files.
    pub data_dir: PathBuf,
    /// File name of the checkpoint within `data_dir`.
    #[builder(default = String::from("mdd.json"), setter(into))]
    pub checkpoint_name: String,
    /// Port whose reassembled files carry SIO framed data.
    #[builder(default = 1)]
    pub framed_port: u32,
}

impl Config {
    #[must_use]
    pub fn datafile(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.datafile(&self.checkpoint_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides() {
        let config = Config::builder()
            .data_dir(PathBuf::from("data"))
            .checkpoint_name("state.json")
            .framed_port(3)
            .build();

        assert_eq!(config.framed_port, 3);
        assert_eq!(config.checkpoint_path(), PathBuf::from("data/state.json"));
        assert_eq!(config.datafile("node58p1.dat"), PathBuf::from("data/node58p1.dat"));
    }
}
