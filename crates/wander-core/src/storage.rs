use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tempfile::NamedTempFile;
use tracing::{
  debug,
  info
};

pub const LIKED_ACTIVITIES_KEY: &str =
  "likedActivities";
pub const INSTALL_PROMPT_DISMISSED_KEY:
  &str = "installPromptDismissed";

const LOCAL_STORAGE_FILE: &str =
  "local_storage.json";

/// String key-value persistence, the
/// shape of browser local storage.
pub trait KeyValueStore {
  fn get(
    &self,
    key: &str
  ) -> anyhow::Result<Option<String>>;
  fn set(
    &self,
    key: &str,
    value: &str
  ) -> anyhow::Result<()>;
  fn remove(
    &self,
    key: &str
  ) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: RefCell<BTreeMap<String, String>>
}

impl KeyValueStore for MemoryStore {
  fn get(
    &self,
    key: &str
  ) -> anyhow::Result<Option<String>> {
    Ok(self.entries.borrow().get(key).cloned())
  }

  fn set(
    &self,
    key: &str,
    value: &str
  ) -> anyhow::Result<()> {
    self
      .entries
      .borrow_mut()
      .insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(
    &self,
    key: &str
  ) -> anyhow::Result<()> {
    self.entries.borrow_mut().remove(key);
    Ok(())
  }
}

/// One JSON object file holding every
/// key, rewritten atomically on change.
#[derive(Debug)]
pub struct FileStore {
  path: PathBuf
}

impl FileStore {
  pub fn open(
    data_dir: &Path
  ) -> anyhow::Result<Self> {
    let path =
      data_dir.join(LOCAL_STORAGE_FILE);
    if !path.exists() {
      fs::write(&path, "{}").with_context(
        || {
          format!(
            "failed to create {}",
            path.display()
          )
        }
      )?;
    }
    debug!(file = %path.display(), "opened key-value store");
    Ok(Self { path })
  }

  fn load(
    &self
  ) -> anyhow::Result<BTreeMap<String, String>>
  {
    let raw =
      fs::read_to_string(&self.path)
        .with_context(|| {
          format!(
            "failed reading {}",
            self.path.display()
          )
        })?;
    if raw.trim().is_empty() {
      return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw).with_context(
      || {
        format!(
          "failed parsing {}",
          self.path.display()
        )
      }
    )
  }

  fn save(
    &self,
    entries: &BTreeMap<String, String>
  ) -> anyhow::Result<()> {
    let dir = self
      .path
      .parent()
      .unwrap_or_else(|| Path::new("."));
    let mut temp =
      NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(
      &mut temp, entries
    )?;
    temp.flush()?;
    temp.persist(&self.path).map_err(
      |err| {
        anyhow!(
          "failed to persist {}: {}",
          self.path.display(),
          err
        )
      }
    )?;
    Ok(())
  }
}

impl KeyValueStore for FileStore {
  fn get(
    &self,
    key: &str
  ) -> anyhow::Result<Option<String>> {
    Ok(self.load()?.get(key).cloned())
  }

  fn set(
    &self,
    key: &str,
    value: &str
  ) -> anyhow::Result<()> {
    let mut entries = self.load()?;
    entries.insert(
      key.to_string(),
      value.to_string()
    );
    self.save(&entries)
  }

  fn remove(
    &self,
    key: &str
  ) -> anyhow::Result<()> {
    let mut entries = self.load()?;
    if entries.remove(key).is_some() {
      self.save(&entries)?;
    }
    Ok(())
  }
}

/// Liked activity ids in the order they
/// were liked, persisted as a JSON array
/// after every toggle.
#[derive(Debug)]
pub struct Favorites<'a, S: KeyValueStore>
{
  store: &'a S,
  ids:   Vec<String>
}

impl<'a, S: KeyValueStore> Favorites<'a, S> {
  #[tracing::instrument(skip(store))]
  pub fn load(
    store: &'a S
  ) -> anyhow::Result<Self> {
    let stored = match store
      .get(LIKED_ACTIVITIES_KEY)?
    {
      | Some(raw) => {
        match serde_json::from_str::<
          Vec<String>
        >(&raw)
        {
          | Ok(ids) => ids,
          | Err(error) => {
            tracing::error!(
              %error,
              "failed parsing liked \
               activities from local \
               storage"
            );
            Vec::new()
          }
        }
      }
      | None => Vec::new()
    };

    let mut ids: Vec<String> =
      Vec::with_capacity(stored.len());
    for id in stored {
      if !ids.contains(&id) {
        ids.push(id);
      }
    }
    debug!(count = ids.len(), "loaded liked activities");
    Ok(Self { store, ids })
  }

  pub fn is_liked(
    &self,
    id: &str
  ) -> bool {
    self.ids.iter().any(|liked| liked == id)
  }

  pub fn ids(&self) -> &[String] {
    &self.ids
  }

  /// Flips the liked state of `id` and
  /// returns the new state. Newly liked
  /// ids go to the end.
  #[tracing::instrument(skip(self))]
  pub fn toggle(
    &mut self,
    id: &str
  ) -> anyhow::Result<bool> {
    let before = self.ids.len();
    self.ids.retain(|liked| liked != id);
    let liked = self.ids.len() == before;
    if liked {
      self.ids.push(id.to_string());
    }
    let json =
      serde_json::to_string(&self.ids)?;
    self
      .store
      .set(LIKED_ACTIVITIES_KEY, &json)?;
    info!(id, liked, "toggled liked activity");
    Ok(liked)
  }
}

pub fn install_prompt_dismissed(
  store: &impl KeyValueStore
) -> anyhow::Result<bool> {
  Ok(matches!(
    store
      .get(INSTALL_PROMPT_DISMISSED_KEY)?
      .as_deref()
      .map(str::trim),
    Some("true" | "1")
  ))
}

pub fn dismiss_install_prompt(
  store: &impl KeyValueStore
) -> anyhow::Result<()> {
  store.set(
    INSTALL_PROMPT_DISMISSED_KEY,
    "true"
  )
}

#[cfg(test)]
mod tests {
  use super::{
    Favorites,
    FileStore,
    KeyValueStore,
    LIKED_ACTIVITIES_KEY,
    MemoryStore,
    dismiss_install_prompt,
    install_prompt_dismissed
  };

  #[test]
  fn toggle_persists_json_array() {
    let store = MemoryStore::default();
    let mut favorites =
      Favorites::load(&store)
        .expect("load favorites");

    assert!(favorites.toggle("b").expect("toggle"));
    assert!(favorites.toggle("a").expect("toggle"));
    assert_eq!(
      store
        .get(LIKED_ACTIVITIES_KEY)
        .expect("get")
        .as_deref(),
      Some(r#"["b","a"]"#)
    );

    assert!(!favorites.toggle("a").expect("toggle"));
    assert!(!favorites.is_liked("a"));
    assert!(favorites.is_liked("b"));
  }

  #[test]
  fn liked_order_survives_reload() {
    let store = MemoryStore::default();
    store
      .set(
        LIKED_ACTIVITIES_KEY,
        r#"["z","m","z","a"]"#
      )
      .expect("set");
    let mut favorites =
      Favorites::load(&store)
        .expect("load favorites");
    assert_eq!(favorites.ids(), ["z", "m", "a"]);

    assert!(!favorites.toggle("m").expect("toggle"));
    assert!(favorites.toggle("m").expect("toggle"));
    assert_eq!(
      store
        .get(LIKED_ACTIVITIES_KEY)
        .expect("get")
        .as_deref(),
      Some(r#"["z","a","m"]"#)
    );
  }

  #[test]
  fn corrupt_liked_value_loads_empty() {
    let store = MemoryStore::default();
    store
      .set(LIKED_ACTIVITIES_KEY, "not json")
      .expect("set");
    let favorites =
      Favorites::load(&store)
        .expect("load favorites");
    assert!(favorites.ids().is_empty());
  }

  #[test]
  fn file_store_survives_reopen() {
    let temp = tempfile::tempdir()
      .expect("tempdir");
    {
      let store = FileStore::open(temp.path())
        .expect("open");
      let mut favorites =
        Favorites::load(&store)
          .expect("load");
      favorites.toggle("x1").expect("toggle");
      dismiss_install_prompt(&store)
        .expect("dismiss");
    }

    let store = FileStore::open(temp.path())
      .expect("reopen");
    let favorites =
      Favorites::load(&store).expect("load");
    assert!(favorites.is_liked("x1"));
    assert!(
      install_prompt_dismissed(&store)
        .expect("flag")
    );

    store
      .remove(super::INSTALL_PROMPT_DISMISSED_KEY)
      .expect("remove");
    assert!(
      !install_prompt_dismissed(&store)
        .expect("flag")
    );
  }
}
