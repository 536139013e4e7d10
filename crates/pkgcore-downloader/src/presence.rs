//! Presence tracking: which entries are "verified present" on disk (spec
//! §4.5.2, §4.5.6). Mutations only ever move an entry from absent to
//! present, per §5's invariant that "re-verified entries can only
//! transition to present, never away from it" — safe for concurrent reads.

use dashmap::DashMap;
use pkgcore_types::FilePath;

#[derive(Default)]
pub struct PresenceMap {
    present: DashMap<FilePath, ()>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_present(&self, path: FilePath) {
        self.present.insert(path, ());
    }

    pub fn is_present(&self, path: &FilePath) -> bool {
        self.present.contains_key(path)
    }

    pub fn present_count(&self) -> usize {
        self.present.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgcore_types::GameDirectory;

    #[test]
    fn starts_empty_and_tracks_marks() {
        let map = PresenceMap::new();
        let path = FilePath::from_relative_path(GameDirectory::Content, "data/hero.json");
        assert!(!map.is_present(&path));
        map.mark_present(path.clone());
        assert!(map.is_present(&path));
        assert_eq!(map.present_count(), 1);
    }
}
