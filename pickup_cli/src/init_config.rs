use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use clap::Subcommand;
use rand::{Rng, distr::Alphanumeric};
use toml_edit::{DocumentMut, Item, Table, value};
use tracing::info;

const TOKEN_LEN: usize = 40;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the config file if it doesn't exist and fills in local
    /// durable backends plus an access token
    Init {
        /// User the generated access token authenticates as
        #[arg(long, value_name = "USER_ID", default_value = "local")]
        user: String,
    },
}

fn table<'a>(doc: &'a mut Table, key: &str) -> anyhow::Result<&'a mut Table> {
    doc.entry(key)
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .ok_or_else(|| anyhow!("config key '{key}' is not a table"))
}

fn path_str(path: &Path) -> anyhow::Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path {path:?} is not valid UTF-8"))
}

/// Inserts `entries` into `[parent.name]` unless that table already exists.
fn insert_default(parent: &mut Table, name: &str, entries: &[(&str, &str)]) {
    if parent.contains_key(name) {
        return;
    }
    let mut t = Table::new();
    for (k, v) in entries {
        t.insert(k, value(*v));
    }
    parent.insert(name, Item::Table(t));
}

impl CmdConfig {
    pub fn run(self, config_file: PathBuf, local_data_dir: &Path) -> anyhow::Result<()> {
        let mut doc = if config_file.exists() {
            fs::read_to_string(&config_file)?
        } else {
            if let Some(parent) = config_file.parent() {
                fs::create_dir_all(parent)?;
            }
            "".to_owned()
        }
        .parse::<DocumentMut>()
        .context("could not parse config file")?;

        match self {
            Self::Init { user } => {
                let root = doc.as_table_mut();
                let status_path = local_data_dir.join("status");
                let queue_path = local_data_dir.join("queue");
                let archive_path = local_data_dir.join("archives");

                let api = table(root, "api")?;
                if !api.contains_key("listen") {
                    api.insert("listen", value("127.0.0.1:3000"));
                }
                if !api.contains_key("bucket") {
                    api.insert("bucket", value("default"));
                }
                let tokens = table(api, "tokens")?;
                if tokens.is_empty() {
                    info!(user, "generating access token");
                    let token: String = rand::rng()
                        .sample_iter(&Alphanumeric)
                        .take(TOKEN_LEN)
                        .map(char::from)
                        .collect();
                    tokens.insert(&token, value(user.as_str()));
                }

                insert_default(root, "status", &[
                    ("type", "redb"),
                    ("path", path_str(&status_path)?),
                ]);
                insert_default(root, "queue", &[
                    ("type", "redb"),
                    ("path", path_str(&queue_path)?),
                ]);
                insert_default(table(root, "store")?, "default", &[
                    ("type", "local"),
                    ("base_path", path_str(&archive_path)?),
                ]);
            }
        }

        info!("writing to config file {config_file:?}");

        let tmp_path = config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, config_file)?;
        Ok(())
    }
}
