//! Directories.
//!
//! A directory is a regular file with special contents: the textual
//! encoding `name:id/` for each entry, every entry closed by `/`. An empty
//! directory is an empty file. Names must not contain `:` or `/`; the
//! create path rejects such names before they reach the codec.
//!
//! The codec functions below are pure string manipulation; the directory
//! operations at the bottom are built entirely from them plus the
//! byte-level file engine.

use log::debug;

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::inode::{InodeId, InodeType};

/// One `(name, inode id)` pair inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub id: InodeId,
}

/// Render an entry list as `e_1/e_2/.../e_k` with `e_j = name_j:id_j`.
/// No trailing delimiter; an empty list renders as the empty string.
pub fn dir_list_to_string(entries: &[DirEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}:{}", e.name, e.id))
        .collect::<Vec<_>>()
        .join("/")
}

/// Append one entry, closing it with the `/` delimiter.
pub fn append_to_directory(src: String, name: &str, id: InodeId) -> String {
    format!("{}{}:{}/", src, name, id)
}

/// Split `src` on `/` into `name:id` entries. Empty segments (notably the
/// one after a trailing delimiter) and malformed segments are skipped; a
/// final segment without the delimiter still parses.
pub fn parse_directory(src: &str) -> Vec<DirEntry> {
    src.split('/')
        .filter(|seg| !seg.is_empty())
        .filter_map(|seg| {
            let (name, id) = seg.split_once(':')?;
            let id = id.parse().ok()?;
            Some(DirEntry {
                name: name.to_string(),
                id,
            })
        })
        .collect()
}

/// Remove the first entry starting with `name`, up to and including its
/// closing `/`. Entry names are unique, so at most one entry goes away.
pub fn rm_from_directory(src: &str, name: &str) -> String {
    match src.find(name) {
        Some(start) => match src[start..].find('/') {
            Some(delim) => format!("{}{}", &src[..start], &src[start + delim + 1..]),
            None => src[..start].to_string(),
        },
        None => src.to_string(),
    }
}

fn content_to_string(content: Vec<u8>) -> Result<String> {
    String::from_utf8(content).map_err(|_| FsError::InvalidArg("directory body is not utf-8"))
}

impl<D: BlockDevice> FileSystem<D> {
    /// List the entries of directory `id`.
    pub fn read_dir(&mut self, id: InodeId) -> Result<Vec<DirEntry>> {
        let content = self.read_file(id)?;
        Ok(parse_directory(&content_to_string(content)?))
    }

    /// Resolve `name` inside directory `dir` to an inode id.
    pub fn lookup(&mut self, dir: InodeId, name: &str) -> Result<InodeId> {
        self.read_dir(dir)?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
            .ok_or(FsError::NotExist)
    }

    /// Create a regular file named `name` under `parent`.
    pub fn mkfile(&mut self, parent: InodeId, name: &str) -> Result<InodeId> {
        self.mk_helper(parent, name, InodeType::File)
    }

    /// Create a directory named `name` under `parent`.
    pub fn mkdir(&mut self, parent: InodeId, name: &str) -> Result<InodeId> {
        self.mk_helper(parent, name, InodeType::Directory)
    }

    fn mk_helper(&mut self, parent: InodeId, name: &str, typ: InodeType) -> Result<InodeId> {
        if name.is_empty() || name.contains(':') || name.contains('/') {
            return Err(FsError::InvalidArg("entry name empty or has reserved characters"));
        }
        let src = content_to_string(self.read_file(parent)?)?;
        if parse_directory(&src).iter().any(|e| e.name == name) {
            return Err(FsError::AlreadyExist);
        }
        let id = self.alloc_inode(typ)?;
        let src = append_to_directory(src, name, id);
        if let Err(e) = self.write_file(parent, src.as_bytes()) {
            let _ = self.remove_file(id);
            return Err(e);
        }
        debug!("create {:?} '{}' as inode {} under {}", typ, name, id, parent);
        Ok(id)
    }

    /// Remove entry `name` from directory `parent`, destroying the inode it
    /// names. Removing a directory that still has entries fails with
    /// [`FsError::NotEmpty`].
    pub fn unlink(&mut self, parent: InodeId, name: &str) -> Result<()> {
        let target = self.lookup(parent, name)?;
        if self.gettype(target)? == InodeType::Directory && !self.read_dir(target)?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        self.remove_file(target)?;
        let src = content_to_string(self.read_file(parent)?)?;
        let src = rm_from_directory(&src, name);
        self.write_file(parent, src.as_bytes())?;
        debug!("unlink '{}' (inode {}) from {}", name, target, parent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_of_empty_is_empty() {
        assert!(parse_directory("").is_empty());
    }

    #[test]
    fn append_then_parse_counts_entries() {
        let mut input = String::new();
        input = append_to_directory(input, "test", 2);
        assert_eq!(parse_directory(&input).len(), 1);

        for i in 0..100u64 {
            input = append_to_directory(input, "test", i + 2);
        }
        let list = parse_directory(&input);
        assert_eq!(list.len(), 101);
        assert_eq!(list[0], DirEntry { name: "test".into(), id: 2 });
        assert_eq!(list[100].id, 101);
    }

    #[test]
    fn remove_drops_exactly_one_entry() {
        let mut input = String::new();
        for i in 0..100u64 {
            input = append_to_directory(input, &format!("test{}", i), i + 2);
        }

        let input = rm_from_directory(&input, "test0");
        assert_eq!(parse_directory(&input).len(), 99);

        let input = rm_from_directory(&input, "test12");
        let list = parse_directory(&input);
        assert_eq!(list.len(), 98);
        assert!(list.iter().all(|e| e.name != "test0" && e.name != "test12"));
        assert!(list.iter().any(|e| e.name == "test1"));
    }

    #[test]
    fn list_round_trips_through_string_form() {
        let entries: Vec<DirEntry> = (0..10u64)
            .map(|i| DirEntry {
                name: format!("entry-{}", i),
                id: i + 2,
            })
            .collect();
        let s = dir_list_to_string(&entries);
        assert!(!s.ends_with('/'));
        assert_eq!(parse_directory(&s), entries);

        assert_eq!(dir_list_to_string(&[]), "");
    }

    #[test]
    fn append_extends_the_parsed_list() {
        let entries: Vec<DirEntry> = (0..5u64)
            .map(|i| DirEntry {
                name: format!("e{}", i),
                id: i + 2,
            })
            .collect();
        let s = append_to_directory(dir_list_to_string(&entries) + "/", "late", 40);
        let mut expect = entries;
        expect.push(DirEntry {
            name: "late".into(),
            id: 40,
        });
        assert_eq!(parse_directory(&s), expect);
    }

    #[test]
    fn remove_handles_the_last_undelimited_entry() {
        let entries: Vec<DirEntry> = (0..3u64)
            .map(|i| DirEntry {
                name: format!("e{}", i),
                id: i + 2,
            })
            .collect();
        let s = dir_list_to_string(&entries);
        let s = rm_from_directory(&s, "e2");
        let list = parse_directory(&s);
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|e| e.name != "e2"));
    }

    #[test]
    fn remove_of_absent_name_is_identity() {
        let s = "a:2/b:3/";
        assert_eq!(rm_from_directory(s, "zzz"), s);
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let list = parse_directory("ok:2/no-colon/also:4/bad-id:x/");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "ok");
        assert_eq!(list[1].id, 4);
    }
}
