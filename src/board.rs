//! Board registry.
//!
//! Boards are loaded once from the `[boards]` table of the launcher
//! configuration and never change during a run.

use std::collections::BTreeMap;

use crate::config::{BoardConfig, RootfsDescriptor};
use crate::job::{NameError, check_name_component};

/// A board of the lab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: String,
    pub arch: Option<String>,
    /// Scheduler device type, the board id unless configured otherwise.
    pub device_type: String,
    pub rootfs: Option<RootfsDescriptor>,
    /// Free-form registry metadata.
    pub extra: BTreeMap<String, String>,
}

impl Board {
    /// Creates a board with no metadata besides its id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            device_type: id.clone(),
            id,
            arch: None,
            rootfs: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn with_rootfs(mut self, rootfs: RootfsDescriptor) -> Self {
        self.rootfs = Some(rootfs);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn from_config(id: &str, config: &BoardConfig) -> Self {
        Self {
            id: id.to_string(),
            arch: config.arch.clone(),
            device_type: config.device_type.clone().unwrap_or_else(|| id.to_string()),
            rootfs: config.rootfs.clone(),
            extra: config.extra.clone(),
        }
    }
}

/// All boards known to the lab, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct BoardRegistry {
    boards: BTreeMap<String, Board>,
}

impl BoardRegistry {
    /// Builds the registry from the `[boards]` configuration table.
    ///
    /// # Errors
    ///
    /// Fails if a board id cannot be used in job names.
    pub fn from_config(boards: &BTreeMap<String, BoardConfig>) -> Result<Self, NameError> {
        let mut registry = Self::default();
        for (id, config) in boards {
            check_name_component("board id", id)?;
            registry.insert(Board::from_config(id, config));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, board: Board) {
        self.boards.insert(board.id.clone(), board);
    }

    pub fn get(&self, id: &str) -> Option<&Board> {
        self.boards.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.boards.contains_key(id)
    }

    /// Board ids in lexicographic order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.boards.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }
}

impl FromIterator<Board> for BoardRegistry {
    fn from_iter<I: IntoIterator<Item = Board>>(iter: I) -> Self {
        let mut registry = Self::default();
        for board in iter {
            registry.insert(board);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sorted() {
        let registry: BoardRegistry = ["sama5d3", "beaglebone", "rpi3", "armada-385"]
            .into_iter()
            .map(Board::new)
            .collect();

        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["armada-385", "beaglebone", "rpi3", "sama5d3"]);
    }

    #[test]
    fn test_from_config_defaults_device_type_to_id() {
        let mut boards = BTreeMap::new();
        boards.insert(
            "rpi3".to_string(),
            BoardConfig {
                arch: Some("arm64".to_string()),
                ..Default::default()
            },
        );
        boards.insert(
            "bbb".to_string(),
            BoardConfig {
                device_type: Some("beaglebone-black".to_string()),
                ..Default::default()
            },
        );

        let registry = BoardRegistry::from_config(&boards).unwrap();
        assert_eq!(registry.get("rpi3").unwrap().device_type, "rpi3");
        assert_eq!(registry.get("rpi3").unwrap().arch.as_deref(), Some("arm64"));
        assert_eq!(registry.get("bbb").unwrap().device_type, "beaglebone-black");
    }

    #[test]
    fn test_from_config_rejects_delimiter_in_id() {
        let mut boards = BTreeMap::new();
        boards.insert("odd--board".to_string(), BoardConfig::default());

        assert!(BoardRegistry::from_config(&boards).is_err());
    }
}
