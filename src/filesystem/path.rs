use log::debug;

use super::Filesystem;
use crate::filetypes::Directory;
use crate::structs::{FileKind, ROOT_INODE};
use crate::Error;

impl Filesystem {
    /// Inode of the live entry `name` inside directory `parent`.
    /// With `kind` set, entries of the other kind are skipped.
    pub fn lookup(
        &mut self,
        parent: u32,
        name: &str,
        kind: Option<FileKind>,
    ) -> Result<u32, Error> {
        let directory = Directory::load(self, parent)?;
        for entry in directory.entries {
            if entry.name() != name.as_bytes() || kind.is_some_and(|kind| kind != entry.kind()) {
                continue;
            }
            let inode = self.load_inode(entry.inode())?;
            if !inode.is_deleted() && inode.kind() == Some(entry.kind()) {
                return Ok(entry.inode());
            }
        }
        Err(Error::NotFound(name.to_owned()))
    }

    /// Inode reached by `path`, absolute from the root or relative to the
    /// current directory. Every component but the last must be a directory.
    pub fn resolve(&mut self, path: &str) -> Result<u32, Error> {
        self.walk(path, None)
    }

    pub fn resolve_file(&mut self, path: &str) -> Result<u32, Error> {
        self.walk(path, Some(FileKind::RegularFile))
    }

    pub fn resolve_directory(&mut self, path: &str) -> Result<u32, Error> {
        self.walk(path, Some(FileKind::Directory))
    }

    fn walk(&mut self, path: &str, last: Option<FileKind>) -> Result<u32, Error> {
        let mut current = if path.starts_with('/') {
            ROOT_INODE
        } else {
            self.current_dir
        };
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            let inode = self.load_inode(current)?;
            if inode.is_deleted() || last.is_some_and(|kind| inode.kind() != Some(kind)) {
                return Err(Error::NotFound(path.to_owned()));
            }
            return Ok(current);
        }
        for (position, component) in components.iter().enumerate() {
            let kind = if position + 1 < components.len() {
                Some(FileKind::Directory)
            } else {
                last
            };
            current = self.lookup(current, component, kind).map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(path.to_owned()),
                e => e,
            })?;
        }
        debug!("Resolved {path} to inode {current}");
        Ok(current)
    }

    pub fn change_directory(&mut self, path: &str) -> Result<u32, Error> {
        let target = self.resolve_directory(path)?;
        debug!("Change directory to inode {target}");
        self.current_dir = target;
        Ok(target)
    }

    pub fn current_directory(&self) -> u32 {
        self.current_dir
    }
}

#[cfg(test)]
mod tests {
    use crate::filesystem::tests::{formatted, small_layout};
    use crate::structs::ROOT_INODE;
    use crate::Error;

    #[test]
    fn resolve_paths() {
        let mut fs = formatted(small_layout());
        let docs = fs.create_directory("docs").unwrap().id();
        let file = fs.create_file("docs/a.txt").unwrap().id();
        assert_eq![fs.resolve("/").unwrap(), ROOT_INODE];
        assert_eq![fs.resolve("").unwrap(), ROOT_INODE];
        assert_eq![fs.resolve(".").unwrap(), ROOT_INODE];
        assert_eq![fs.resolve("docs").unwrap(), docs];
        assert_eq![fs.resolve("/docs/a.txt").unwrap(), file];
        assert_eq![fs.resolve("docs//a.txt").unwrap(), file];
        assert_eq![fs.resolve("docs/..").unwrap(), ROOT_INODE];
        assert_eq![fs.resolve("docs/./a.txt").unwrap(), file];
        assert!(matches!(fs.resolve("docs/b.txt"), Err(Error::NotFound(_))));
        assert!(matches!(fs.resolve("docs/a.txt/x"), Err(Error::NotFound(_))));
        assert!(matches!(fs.resolve_directory("docs/a.txt"), Err(Error::NotFound(_))));
        assert!(matches!(fs.resolve_file("docs"), Err(Error::NotFound(_))));
        assert!(matches!(fs.resolve_file("/"), Err(Error::NotFound(_))));
    }

    #[test]
    fn relative_to_current_directory() {
        let mut fs = formatted(small_layout());
        let sub = fs.create_directory("docs/sub").err();
        assert!(matches!(sub, Some(Error::NotFound(_))));
        let docs = fs.create_directory("docs").unwrap().id();
        let sub = fs.create_directory("docs/sub").unwrap().id();
        assert_eq![fs.change_directory("docs").unwrap(), docs];
        assert_eq![fs.current_directory(), docs];
        assert_eq![fs.resolve("sub").unwrap(), sub];
        assert_eq![fs.resolve("..").unwrap(), ROOT_INODE];
        assert_eq![fs.change_directory("sub/..").unwrap(), docs];
        assert!(fs.change_directory("missing").is_err());
        assert_eq![fs.current_directory(), docs];
        assert_eq![fs.change_directory("/").unwrap(), ROOT_INODE];
    }

    #[test]
    fn same_name_different_kinds() {
        let mut fs = formatted(small_layout());
        let file = fs.create_file("twin").unwrap().id();
        let dir = fs.create_directory("twin").unwrap().id();
        assert_ne![file, dir];
        assert_eq![fs.resolve_file("twin").unwrap(), file];
        assert_eq![fs.resolve_directory("twin").unwrap(), dir];
        let inner = fs.create_file("twin/inner").unwrap().id();
        assert_eq![fs.resolve("twin/inner").unwrap(), inner];
    }
}
