//! Read-only FUSE filesystem with a single file, `random_quote.txt`, whose
//! content is refetched every time the kernel looks it up.

use crate::error::FetchError;
use crate::quotes::{fetch_attributed_quote, fetch_quote, QuoteSource};
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry,
    Request,
};
use libc::{c_int, EINVAL, EIO, ENOENT, ENOTDIR};
use std::ffi::OsStr;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;

pub const QUOTE_FILE: &str = "random_quote.txt";
pub const ROOT_INO: u64 = 1;
pub const QUOTE_INO: u64 = 2;

// the content changes on every lookup, so nothing may be cached
const TTL: Duration = Duration::ZERO;

/// Who the mounted files appear to belong to.
#[derive(Debug, Clone, Copy)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Owner {
            uid: meta.uid(),
            gid: meta.gid(),
        })
    }
}

pub struct QuoteFs<S> {
    source: S,
    runtime: Handle,
    category: String,
    with_author: bool,
    owner: Owner,
    content: Vec<u8>,
    updated: SystemTime,
}

impl<S> QuoteFs<S>
where
    S: QuoteSource + Sync,
{
    /// `runtime` drives the fetches; the filesystem callbacks run on fuser's
    /// own thread, outside of it.
    pub fn new(source: S, runtime: Handle, category: impl Into<String>, with_author: bool, owner: Owner) -> Self {
        QuoteFs {
            source,
            runtime,
            category: category.into(),
            with_author,
            owner,
            content: Vec::new(),
            updated: UNIX_EPOCH,
        }
    }

    fn refresh(&mut self) -> Result<(), FetchError> {
        let line = if self.with_author {
            self.runtime
                .block_on(fetch_attributed_quote(&self.source, &self.category))?
        } else {
            self.runtime.block_on(fetch_quote(&self.source, &self.category))?
        };
        let mut content = line.trim().to_string();
        content.push('\n');
        self.content = content.into_bytes();
        self.updated = SystemTime::now();
        Ok(())
    }

    fn make_attr(&self, ino: u64) -> FileAttr {
        let (kind, size, perm, nlink, time) = if ino == ROOT_INO {
            (FileType::Directory, 0, 0o555, 2, UNIX_EPOCH)
        } else {
            (FileType::RegularFile, self.content.len() as u64, 0o444, 1, self.updated)
        };
        FileAttr {
            ino,
            size,
            blocks: (size + 511) / 512,
            atime: time,
            mtime: time,
            ctime: time,
            crtime: time,
            kind,
            perm,
            nlink,
            uid: self.owner.uid,
            gid: self.owner.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    pub fn lookup_entry(&mut self, parent: u64, name: &OsStr) -> Result<FileAttr, c_int> {
        if parent != ROOT_INO || name.to_str() != Some(QUOTE_FILE) {
            return Err(ENOENT);
        }
        if let Err(e) = self.refresh() {
            tracing::error!("Failed to refresh {}: {}", QUOTE_FILE, e);
            return Err(EIO);
        }
        Ok(self.make_attr(QUOTE_INO))
    }

    pub fn attr(&self, ino: u64) -> Result<FileAttr, c_int> {
        match ino {
            ROOT_INO | QUOTE_INO => Ok(self.make_attr(ino)),
            _ => Err(ENOENT),
        }
    }

    /// At most `size` bytes from `offset`; reading past the end gives nothing.
    pub fn read_at(&self, ino: u64, offset: i64, size: u32) -> Result<&[u8], c_int> {
        if ino != QUOTE_INO {
            return Err(ENOENT);
        }
        let len = self.content.len();
        let start = usize::try_from(offset).map_err(|_| EINVAL)?.min(len);
        let end = start.saturating_add(size as usize).min(len);
        Ok(&self.content[start..end])
    }

    /// Directory entries after `offset`, each paired with the offset of the next one.
    pub fn entries(&self, ino: u64, offset: i64) -> Result<Vec<(u64, i64, FileType, &'static str)>, c_int> {
        match ino {
            ROOT_INO => {}
            QUOTE_INO => return Err(ENOTDIR),
            _ => return Err(ENOENT),
        }
        let all = [
            (ROOT_INO, FileType::Directory, "."),
            (ROOT_INO, FileType::Directory, ".."),
            (QUOTE_INO, FileType::RegularFile, QUOTE_FILE),
        ];
        let skip = usize::try_from(offset).map_err(|_| EINVAL)?;
        Ok(all
            .into_iter()
            .enumerate()
            .skip(skip)
            .map(|(i, (ino, kind, name))| (ino, i as i64 + 1, kind, name))
            .collect())
    }
}

impl<S> Filesystem for QuoteFs<S>
where
    S: QuoteSource + Sync,
{
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.attr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_at(ino, offset, size) {
            Ok(data) => reply.data(data),
            Err(e) => reply.error(e),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        match self.entries(ino, offset) {
            Ok(entries) => {
                for (ino, next, kind, name) in entries {
                    if reply.add(ino, next, kind, name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e),
        }
    }
}

pub fn mount_options(auto_unmount: bool, allow_root: bool) -> Vec<MountOption> {
    let mut options = vec![MountOption::RO, MountOption::FSName("randquote".to_string())];
    if auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if allow_root {
        options.push(MountOption::AllowRoot);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::Quote;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::{Builder, Runtime};

    enum Reply {
        Numbered,
        Rejected,
        Empty,
    }

    struct Counting {
        calls: AtomicUsize,
        reply: Reply,
    }

    #[async_trait]
    impl QuoteSource for Counting {
        async fn random_quote(&self, category: &str) -> Result<Quote, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.reply {
                Reply::Numbered => Ok(Quote {
                    quote: format!("  {} quote {}.  ", category, n),
                    author: Some("Someone".into()),
                    category: Some(category.into()),
                }),
                Reply::Rejected => Err(FetchError::Rejected(StatusCode::UNAUTHORIZED)),
                Reply::Empty => Err(FetchError::Empty),
            }
        }
    }

    fn runtime() -> Runtime {
        Builder::new_current_thread().build().unwrap()
    }

    fn quote_fs(rt: &Runtime, reply: Reply, with_author: bool) -> QuoteFs<Counting> {
        let source = Counting {
            calls: AtomicUsize::new(0),
            reply,
        };
        let owner = Owner { uid: 1000, gid: 100 };
        QuoteFs::new(source, rt.handle().clone(), "happiness", with_author, owner)
    }

    fn content(fs: &QuoteFs<Counting>) -> String {
        String::from_utf8(fs.read_at(QUOTE_INO, 0, 4096).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn lookup_fetches_a_fresh_quote() {
        let rt = runtime();
        let mut fs = quote_fs(&rt, Reply::Numbered, false);

        let attr = fs.lookup_entry(ROOT_INO, OsStr::new(QUOTE_FILE)).unwrap();
        assert_eq!(attr.ino, QUOTE_INO);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.uid, 1000);
        assert_eq!(content(&fs), "happiness quote 1.\n");
        assert_eq!(attr.size, "happiness quote 1.\n".len() as u64);

        fs.lookup_entry(ROOT_INO, OsStr::new(QUOTE_FILE)).unwrap();
        assert_eq!(content(&fs), "happiness quote 2.\n");
        assert_eq!(fs.attr(QUOTE_INO).unwrap().size, content(&fs).len() as u64);
    }

    #[test]
    fn lookup_with_author() {
        let rt = runtime();
        let mut fs = quote_fs(&rt, Reply::Numbered, true);
        fs.lookup_entry(ROOT_INO, OsStr::new(QUOTE_FILE)).unwrap();
        assert_eq!(content(&fs), "\"  happiness quote 1.  \" ~Someone\n");
    }

    #[test]
    fn lookup_of_unknown_names() {
        let rt = runtime();
        let mut fs = quote_fs(&rt, Reply::Numbered, false);
        assert_eq!(fs.lookup_entry(ROOT_INO, OsStr::new("other.txt")).unwrap_err(), ENOENT);
        assert_eq!(fs.lookup_entry(QUOTE_INO, OsStr::new(QUOTE_FILE)).unwrap_err(), ENOENT);
        assert_eq!(fs.source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejected_fetch_shows_error_marker() {
        let rt = runtime();
        let mut fs = quote_fs(&rt, Reply::Rejected, false);
        fs.lookup_entry(ROOT_INO, OsStr::new(QUOTE_FILE)).unwrap();
        assert_eq!(content(&fs), "Error:\n");
    }

    #[test]
    fn broken_fetch_is_an_io_error() {
        let rt = runtime();
        let mut fs = quote_fs(&rt, Reply::Empty, false);
        assert_eq!(fs.lookup_entry(ROOT_INO, OsStr::new(QUOTE_FILE)).unwrap_err(), EIO);
        assert!(content(&fs).is_empty());
    }

    #[test]
    fn getattr_by_inode() {
        let rt = runtime();
        let fs = quote_fs(&rt, Reply::Numbered, false);
        let root = fs.attr(ROOT_INO).unwrap();
        assert_eq!(root.kind, FileType::Directory);
        assert_eq!(root.nlink, 2);
        assert_eq!(fs.attr(QUOTE_INO).unwrap().perm, 0o444);
        assert_eq!(fs.attr(3).unwrap_err(), ENOENT);
    }

    #[test]
    fn read_honours_offset_and_size() {
        let rt = runtime();
        let mut fs = quote_fs(&rt, Reply::Numbered, false);
        fs.lookup_entry(ROOT_INO, OsStr::new(QUOTE_FILE)).unwrap();

        assert_eq!(fs.read_at(QUOTE_INO, 0, 9).unwrap(), b"happiness");
        assert_eq!(fs.read_at(QUOTE_INO, 10, 5).unwrap(), b"quote");
        assert!(fs.read_at(QUOTE_INO, 1000, 10).unwrap().is_empty());
        assert_eq!(fs.read_at(QUOTE_INO, -1, 10).unwrap_err(), EINVAL);
        assert_eq!(fs.read_at(ROOT_INO, 0, 10).unwrap_err(), ENOENT);
    }

    #[test]
    fn readdir_lists_the_quote_file() {
        let rt = runtime();
        let fs = quote_fs(&rt, Reply::Numbered, false);

        let entries = fs.entries(ROOT_INO, 0).unwrap();
        assert_eq!(
            entries,
            vec![
                (ROOT_INO, 1, FileType::Directory, "."),
                (ROOT_INO, 2, FileType::Directory, ".."),
                (QUOTE_INO, 3, FileType::RegularFile, QUOTE_FILE),
            ]
        );

        let rest = fs.entries(ROOT_INO, 2).unwrap();
        assert_eq!(rest, vec![(QUOTE_INO, 3, FileType::RegularFile, QUOTE_FILE)]);
        assert!(fs.entries(ROOT_INO, 3).unwrap().is_empty());
        assert_eq!(fs.entries(QUOTE_INO, 0).unwrap_err(), ENOTDIR);
        assert_eq!(fs.entries(42, 0).unwrap_err(), ENOENT);
    }

    #[test]
    fn options_follow_flags() {
        let options = mount_options(true, true);
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(options.contains(&MountOption::AllowRoot));
        assert_eq!(mount_options(false, false).len(), 2);
    }
}
