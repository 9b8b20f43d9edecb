use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{FileAttr, FileType, MountOption};
use log::{debug, error, info, warn};

use super::Filesystem;
use crate::filetypes::{validate_name, MAX_NAME_LENGTH};
use crate::structs::{FileKind, Inode, Layout};
use crate::Error;

const TTL: Duration = Duration::from_secs(0);
const FILE_PERMISSIONS: u16 = 0o644;
const DIRECTORY_PERMISSIONS: u16 = 0o755;

/// Kernel-facing adapter. FUSE numbers inodes from 1, so inode `n` is
/// exposed as `n + 1`.
#[derive(Debug)]
pub struct FuseFs {
    pub(crate) filesystem: Filesystem,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
}

impl FuseFs {
    pub fn new(filesystem: Filesystem) -> Self {
        // SAFETY: getuid and getgid never fail
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            filesystem,
            uid,
            gid,
        }
    }

    fn attrs(&self, inode: &Inode) -> FileAttr {
        attrs(inode, &self.filesystem.layout, self.uid, self.gid)
    }

    fn live_inode(&mut self, ino: u64) -> Result<Inode, Error> {
        let inode = self.filesystem.load_inode(to_index(ino))?;
        if inode.kind().is_none() || inode.is_deleted() {
            return Err(Error::NotFound(format!("inode {ino}")));
        }
        Ok(inode)
    }
}

fn to_index(ino: u64) -> u32 {
    ino.saturating_sub(1) as u32
}

fn to_ino(index: u32) -> u64 {
    index as u64 + 1
}

fn name_str(name: &OsStr) -> Result<&str, Error> {
    name.to_str()
        .ok_or_else(|| Error::InvalidName(name.to_string_lossy().into_owned()))
}

impl From<FileKind> for FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => FileType::RegularFile,
            FileKind::Directory => FileType::Directory,
        }
    }
}

pub(crate) fn attrs(inode: &Inode, layout: &Layout, uid: u32, gid: u32) -> FileAttr {
    let kind = inode.kind().unwrap_or(FileKind::RegularFile);
    let perm = match kind {
        FileKind::RegularFile => FILE_PERMISSIONS,
        FileKind::Directory => DIRECTORY_PERMISSIONS,
    };
    FileAttr {
        ino: to_ino(inode.index()),
        size: inode.size() as u64,
        blocks: layout.blocks_for(inode.size() as u64),
        atime: UNIX_EPOCH + Duration::from_secs(inode.accessed_at() as u64),
        mtime: UNIX_EPOCH + Duration::from_secs(inode.modified_at() as u64),
        ctime: UNIX_EPOCH + Duration::from_secs(inode.modified_at() as u64),
        crtime: UNIX_EPOCH + Duration::from_secs(inode.created_at() as u64),
        kind: kind.into(),
        perm,
        nlink: 1,
        uid,
        gid,
        rdev: 0,
        blksize: layout.block_size(),
        flags: 0,
    }
}

/// Serve `filesystem` at `mountpoint` until it is unmounted
pub fn mount(filesystem: Filesystem, mountpoint: &Path) -> Result<(), Error> {
    let options = [
        MountOption::FSName("ext2lite".to_owned()),
        MountOption::RW,
    ];
    info!("Mounting filesystem at {}", mountpoint.display());
    fuser::mount2(FuseFs::new(filesystem), mountpoint, &options)?;
    Ok(())
}

impl fuser::Filesystem for FuseFs {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        info!("Initializing filesystem");
        let usage = self.filesystem.usage()?;
        debug!(
            "{} of {} blocks and {} of {} inodes free",
            usage.free_blocks, usage.total_blocks, usage.free_inodes, usage.total_inodes
        );
        Ok(())
    }

    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("Lookup {name:?} in directory with inode {parent}");
        let mut inner = || -> Result<FileAttr, Error> {
            let index = self
                .filesystem
                .lookup(to_index(parent), name_str(name)?, None)?;
            let inode = self.filesystem.load_inode(index)?;
            Ok(self.attrs(&inode))
        };
        match inner() {
            Ok(attrs) => {
                reply.entry(&TTL, &attrs, 0);
                debug!("Success");
            }
            Err(e) => {
                debug!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        info!("Get attributes for inode {ino}");
        match self.live_inode(ino) {
            Ok(inode) => {
                reply.attr(&TTL, &self.attrs(&inode));
                debug!("Success");
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        info!("Set attributes for inode {ino}");
        let mut inner = || -> Result<FileAttr, Error> {
            if let Some(size) = size {
                self.truncate(ino, size)?;
            }
            let inode = self.live_inode(ino)?;
            Ok(self.attrs(&inode))
        };
        match inner() {
            Ok(attrs) => {
                reply.attr(&TTL, &attrs);
                debug!("Success");
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        info!("Open file {ino}");
        match self.live_inode(ino) {
            Ok(inode) if inode.is_regular_file() => {
                reply.opened(0, fuser::consts::FOPEN_DIRECT_IO);
                debug!("Success");
            }
            Ok(_) => {
                warn!("Unable to open non-regular file");
                reply.error(libc::EISDIR);
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn opendir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        info!("Open directory {ino}");
        match self.live_inode(ino) {
            Ok(inode) if inode.is_dir() => {
                reply.opened(0, 0);
                debug!("Success");
            }
            Ok(_) => {
                warn!("Unable to open file as a directory");
                reply.error(libc::ENOTDIR);
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        info!("Reading directory {ino} with offset {offset}");
        match self.filesystem.list_files(to_index(ino)) {
            Ok(entries) => {
                for (position, entry) in entries.iter().enumerate().skip(offset as usize) {
                    let name = OsStr::from_bytes(entry.name());
                    if reply.add(
                        to_ino(entry.inode()),
                        position as i64 + 1,
                        entry.kind().into(),
                        name,
                    ) {
                        debug!("Buffer full");
                        break;
                    }
                }
                reply.ok();
                debug!("Success");
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("Make node {name:?} in parent directory {parent}");
        self.create_entry(parent, name, FileKind::RegularFile, reply);
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("Make directory {name:?} in parent directory {parent}");
        self.create_entry(parent, name, FileKind::Directory, reply);
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        info!("Read {size} bytes from file {ino} with offset {offset}");
        match self.filesystem.read_inode_data(to_index(ino)) {
            Ok(data) => {
                let start = (offset.max(0) as usize).min(data.len());
                let end = (start + size as usize).min(data.len());
                reply.data(&data[start..end]);
                debug!("Success");
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        info!("Write {} bytes to file {ino} with offset {offset}", data.len());
        match self.write_at(ino, offset, data) {
            Ok(()) => {
                reply.written(data.len() as u32);
                debug!("Success");
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("Unlink {name:?} from parent directory {parent}");
        self.remove_entry(parent, name, FileKind::RegularFile, reply);
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("Remove directory {name:?} with parent {parent}");
        self.remove_entry(parent, name, FileKind::Directory, reply);
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        info!("Get filesystem statistics");
        match self.filesystem.usage() {
            Ok(usage) => {
                let block_size = self.filesystem.layout.block_size();
                reply.statfs(
                    usage.total_blocks,
                    usage.free_blocks,
                    usage.free_blocks,
                    usage.total_inodes - usage.free_inodes,
                    usage.free_inodes,
                    block_size,
                    MAX_NAME_LENGTH as u32,
                    block_size,
                );
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn flush(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: fuser::ReplyEmpty,
    ) {
        info!("Filesystem flush requested for inode {ino}");
        match self.filesystem.sync() {
            Ok(()) => {
                debug!("Success");
                reply.ok();
            }
            Err(e) => {
                error!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn fsync(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        info!("Filesystem sync requested for inode {ino}");
        match self.filesystem.sync() {
            Ok(()) => {
                debug!("Success");
                reply.ok();
            }
            Err(e) => {
                error!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn destroy(&mut self) {
        info!("Destroying filesystem");
        self.filesystem
            .sync()
            .unwrap_or_else(|e| error!("Unexpected error: {e}"));
    }
}

impl FuseFs {
    fn create_entry(
        &mut self,
        parent: u64,
        name: &OsStr,
        kind: FileKind,
        reply: fuser::ReplyEntry,
    ) {
        let mut inner = || -> Result<FileAttr, Error> {
            let creation = self
                .filesystem
                .create_in(to_index(parent), name_str(name)?, kind)?;
            if !creation.is_new() {
                return Err(Error::Io(std::io::Error::from_raw_os_error(libc::EEXIST)));
            }
            let inode = self.filesystem.load_inode(creation.id())?;
            Ok(self.attrs(&inode))
        };
        match inner() {
            Ok(attrs) => {
                reply.entry(&TTL, &attrs, 0);
                debug!("Success");
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    fn remove_entry(
        &mut self,
        parent: u64,
        name: &OsStr,
        kind: FileKind,
        reply: fuser::ReplyEmpty,
    ) {
        match self.remove_child(parent, name, kind) {
            Ok(()) => {
                reply.ok();
                debug!("Success");
            }
            Err(e) => {
                warn!("Error: {e}");
                reply.error(e.into());
            }
        }
    }

    /// Resize file `ino` to `size` bytes, zero filling any growth
    fn truncate(&mut self, ino: u64, size: u64) -> Result<(), Error> {
        let inode = self.live_inode(ino)?;
        if inode.is_dir() {
            return Err(Error::InvalidName(format!("directory inode {ino}")));
        }
        let size = within_capacity(&self.filesystem.layout, size)?;
        debug!("Truncating to {size} bytes");
        let mut data = if size == 0 {
            Vec::new()
        } else {
            self.filesystem.read_inode_data(inode.index())?
        };
        data.resize(size, 0);
        self.filesystem.write_inode_data(inode.index(), &data, false)
    }

    /// Write `data` into file `ino` starting at byte `offset`
    fn write_at(&mut self, ino: u64, offset: i64, data: &[u8]) -> Result<(), Error> {
        let index = to_index(ino);
        let inode = self.live_inode(ino)?;
        let start = u64::try_from(offset)
            .map_err(|_| Error::Io(std::io::Error::from_raw_os_error(libc::EINVAL)))?;
        let end = start
            .checked_add(data.len() as u64)
            .ok_or_else(|| Error::Io(std::io::Error::from_raw_os_error(libc::EFBIG)))?;
        let end = within_capacity(&self.filesystem.layout, end)?;
        let start = end - data.len();
        if start == inode.size() as usize {
            return self.filesystem.write_inode_data(index, data, true);
        }
        let mut content = self.filesystem.read_inode_data(index)?;
        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);
        self.filesystem.write_inode_data(index, &content, false)
    }

    /// Remove `name` from `parent`. Directories must hold nothing but
    /// `.` and `..`.
    fn remove_child(&mut self, parent: u64, name: &OsStr, kind: FileKind) -> Result<(), Error> {
        let name = name_str(name)?;
        validate_name(name)?;
        let parent = to_index(parent);
        if kind == FileKind::Directory {
            let index = self.filesystem.lookup(parent, name, Some(kind))?;
            let populated = self
                .filesystem
                .list_files(index)?
                .iter()
                .any(|entry| !entry.is_link());
            if populated {
                return Err(Error::Io(std::io::Error::from_raw_os_error(libc::ENOTEMPTY)));
            }
        }
        self.filesystem.remove_in(parent, name, kind)
    }
}

/// Byte length `size` as a buffer length, if a file may grow that large
fn within_capacity(layout: &Layout, size: u64) -> Result<usize, Error> {
    let block_size = layout.block_size() as u64;
    let capacity = layout.max_file_blocks();
    if size > capacity * block_size {
        return Err(Error::FileTooLarge {
            required: size.div_ceil(block_size),
            capacity,
        });
    }
    usize::try_from(size).map_err(|_| Error::FileTooLarge {
        required: size.div_ceil(block_size),
        capacity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::tests::{formatted, small_layout};
    use crate::structs::ROOT_INODE;

    #[test]
    fn inode_numbering() {
        assert_eq![to_ino(ROOT_INODE), fuser::FUSE_ROOT_ID];
        assert_eq![to_index(fuser::FUSE_ROOT_ID), ROOT_INODE];
        assert_eq![to_index(to_ino(41)), 41];
    }

    #[test]
    fn file_attributes() {
        let mut fs = formatted(small_layout());
        let index = fs.write_file("notes", &[0u8; 1300], false).unwrap();
        let inode = fs.load_inode(index).unwrap();
        let attrs = attrs(&inode, &fs.layout(), 1000, 100);
        assert_eq![attrs.ino, index as u64 + 1];
        assert_eq![attrs.size, 1300];
        assert_eq![attrs.blocks, 3];
        assert_eq![attrs.kind, FileType::RegularFile];
        assert_eq![attrs.perm, FILE_PERMISSIONS];
        assert_eq![attrs.uid, 1000];
        let root = fs.load_inode(ROOT_INODE).unwrap();
        assert_eq![attrs_kind(&root, &fs.layout()), FileType::Directory];
    }

    fn attrs_kind(inode: &Inode, layout: &Layout) -> FileType {
        attrs(inode, layout, 0, 0).kind
    }

    #[test]
    fn exposes_engine_through_adapter() {
        let mut fuse = FuseFs::new(formatted(small_layout()));
        let root = fuse.live_inode(fuser::FUSE_ROOT_ID).unwrap();
        assert![root.is_dir()];
        assert!(matches!(fuse.live_inode(5), Err(Error::NotFound(_))));
    }

    #[test]
    fn oversized_writes_fail_before_allocating() {
        let mut fuse = FuseFs::new(formatted(small_layout()));
        let index = fuse.filesystem.write_file("big", b"start", false).unwrap();
        let ino = to_ino(index);
        let before = fuse.filesystem.usage().unwrap();
        assert!(matches!(
            fuse.truncate(ino, 100 << 30),
            Err(Error::FileTooLarge { capacity: 142, .. })
        ));
        assert!(matches!(
            fuse.write_at(ino, 1 << 40, b"tail"),
            Err(Error::FileTooLarge { .. })
        ));
        assert!(matches!(
            fuse.write_at(ino, i64::MAX, b"tail"),
            Err(Error::FileTooLarge { .. })
        ));
        let negative = fuse.write_at(ino, -1, b"tail").unwrap_err();
        assert_eq![libc::c_int::from(negative), libc::EINVAL];
        assert_eq![fuse.filesystem.usage().unwrap(), before];
        assert_eq![fuse.filesystem.read_file("big").unwrap(), b"start"];

        let limit = 142 * 512;
        fuse.truncate(ino, limit).unwrap();
        assert_eq![fuse.live_inode(ino).unwrap().size() as u64, limit];
        fuse.write_at(ino, 2, b"AR").unwrap();
        assert_eq![&fuse.filesystem.read_file("big").unwrap()[..5], b"stARt"];
        fuse.truncate(ino, 3).unwrap();
        fuse.write_at(ino, 3, b"!").unwrap();
        assert_eq![fuse.filesystem.read_file("big").unwrap(), b"sta!"];
    }

    #[test]
    fn rmdir_refuses_populated_directories() {
        let mut fuse = FuseFs::new(formatted(small_layout()));
        let root = fuser::FUSE_ROOT_ID;
        let docs = fuse.filesystem.create_directory("docs").unwrap().id();
        fuse.filesystem.create_file("docs/keep.txt").unwrap();
        fuse.filesystem.create_directory("empty").unwrap();

        assert!(matches!(
            fuse.remove_child(to_ino(docs), OsStr::new(".."), FileKind::Directory),
            Err(Error::InvalidName(_))
        ));
        let refused = fuse
            .remove_child(root, OsStr::new("docs"), FileKind::Directory)
            .unwrap_err();
        assert_eq![libc::c_int::from(refused), libc::ENOTEMPTY];
        assert![!fuse.filesystem.load_inode(docs).unwrap().is_deleted()];
        assert![fuse.filesystem.resolve_file("docs/keep.txt").is_ok()];

        fuse.remove_child(root, OsStr::new("empty"), FileKind::Directory)
            .unwrap();
        assert!(matches!(
            fuse.filesystem.resolve("empty"),
            Err(Error::NotFound(_))
        ));
        fuse.remove_child(to_ino(docs), OsStr::new("keep.txt"), FileKind::RegularFile)
            .unwrap();
        fuse.remove_child(root, OsStr::new("docs"), FileKind::Directory)
            .unwrap();
        assert![fuse.filesystem.load_inode(docs).unwrap().is_deleted()];
    }
}
