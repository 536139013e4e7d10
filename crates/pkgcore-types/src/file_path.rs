//! Normalised, case-insensitive content identifiers.

use std::fmt;

/// A coarse grouping an entry's relative path is rooted under, analogous to
/// the teacher's game-directory tag on an archive header. Unknown tags from
/// older or foreign archives round-trip through [`GameDirectory::Other`]
/// rather than failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GameDirectory {
    Content,
    Config,
    Save,
    Log,
    Video,
    Other(u8),
}

impl GameDirectory {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => Self::Content,
            1 => Self::Config,
            2 => Self::Save,
            3 => Self::Log,
            4 => Self::Video,
            other => Self::Other(other),
        }
    }

    pub fn as_tag(self) -> u8 {
        match self {
            Self::Content => 0,
            Self::Config => 1,
            Self::Save => 2,
            Self::Log => 3,
            Self::Video => 4,
            Self::Other(tag) => tag,
        }
    }
}

/// The logical content type of a file, independent of its on-disk extension
/// spelling. `Unknown` preserves the original extension text so round-trips
/// through a file table never lose information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    Json,
    Texture,
    Script,
    Audio,
    SaveGame,
    Unknown(String),
}

impl FileType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "dds" | "png" | "tex" => Self::Texture,
            "lua" | "script" => Self::Script,
            "ogg" | "wav" | "fsb" => Self::Audio,
            "sav" | "save" => Self::SaveGame,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn extension(&self) -> &str {
        match self {
            Self::Json => "json",
            Self::Texture => "dds",
            Self::Script => "lua",
            Self::Audio => "ogg",
            Self::SaveGame => "sav",
            Self::Unknown(ext) => ext,
        }
    }
}

/// Normalised identifier for a single logical content entry:
/// `(directory-tag, relative-path-without-extension, file-type)`.
///
/// Comparison and hashing are case-insensitive on the relative path; the
/// original-case text is retained for display and for writing back into a
/// file table. Path separators are normalised to `/` so a `FilePath` built
/// from a Windows-style or Unix-style input path is stable across hosts.
#[derive(Debug, Clone)]
pub struct FilePath {
    directory: GameDirectory,
    relative_path: String,
    relative_path_lower: String,
    file_type: FileType,
}

impl FilePath {
    pub fn new(directory: GameDirectory, relative_path: impl Into<String>, file_type: FileType) -> Self {
        let relative_path = relative_path.into().replace('\\', "/");
        let relative_path_lower = relative_path.to_ascii_lowercase();
        Self {
            directory,
            relative_path,
            relative_path_lower,
            file_type,
        }
    }

    /// Parse a `directory/relative/path.ext` style string into a `FilePath`,
    /// splitting the extension off into `file_type`.
    pub fn from_relative_path(directory: GameDirectory, path: &str) -> Self {
        let normalized = path.replace('\\', "/");
        match normalized.rsplit_once('.') {
            Some((stem, ext)) => Self::new(directory, stem, FileType::from_extension(ext)),
            None => Self::new(directory, normalized, FileType::Unknown(String::new())),
        }
    }

    pub fn directory(&self) -> GameDirectory {
        self.directory
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn file_type(&self) -> &FileType {
        &self.file_type
    }

    /// The path as it would appear on disk: relative path plus extension,
    /// forward-slash separated. This is the string the obfuscation key is
    /// derived from (spec §4.3).
    pub fn to_archive_relative_string(&self) -> String {
        let ext = self.file_type.extension();
        if ext.is_empty() {
            self.relative_path.clone()
        } else {
            format!("{}.{}", self.relative_path, ext)
        }
    }
}

impl PartialEq for FilePath {
    fn eq(&self, other: &Self) -> bool {
        self.directory == other.directory
            && self.relative_path_lower == other.relative_path_lower
            && self.file_type == other.file_type
    }
}

impl Eq for FilePath {}

impl std::hash::Hash for FilePath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.directory.hash(state);
        self.relative_path_lower.hash(state);
        self.file_type.hash(state);
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_archive_relative_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_equality() {
        let a = FilePath::from_relative_path(GameDirectory::Content, "Data/Textures/Hero.DDS");
        let b = FilePath::from_relative_path(GameDirectory::Content, "data/textures/hero.dds");
        assert_eq!(a, b);
    }

    #[test]
    fn backslashes_normalise_to_forward_slash() {
        let a = FilePath::from_relative_path(GameDirectory::Content, "Data\\Textures\\Hero.dds");
        assert_eq!(a.relative_path(), "Data/Textures/Hero");
        assert_eq!(a.to_archive_relative_string(), "Data/Textures/Hero.dds");
    }

    #[test]
    fn different_directory_not_equal() {
        let a = FilePath::from_relative_path(GameDirectory::Content, "foo.json");
        let b = FilePath::from_relative_path(GameDirectory::Save, "foo.json");
        assert_ne!(a, b);
    }
}
