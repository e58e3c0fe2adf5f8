//! Raw, positioned page I/O against a single file: `add_page`, `get_page`,
//! `put_page` split out from the in-memory `Page` view.
//!
//! There is no buffer pool or async file handle here: a `Relation` is
//! exclusive to one logical actor and all I/O is synchronous, so this
//! layer talks directly to the file with `pread`/`pwrite`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use nix::sys::uio::{pread, pwrite};

use crate::page::{Page, PageID, PAGESIZE};

/// A file holding a contiguous sequence of fixed-size pages, addressed by
/// 0-based `PageID`.
pub struct PagedFile {
    file: File,
    n_pages: u32,
}

impl PagedFile {
    /// Creates a new, empty backing file (truncating any existing one).
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        Ok(Self { file, n_pages: 0 })
    }

    /// Opens an existing backing file; `n_pages` is derived from its size.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        let n_pages = (len / PAGESIZE as u64) as u32;
        Ok(Self { file, n_pages })
    }

    pub fn n_pages(&self) -> u32 {
        self.n_pages
    }

    /// Allocates and persists a fresh, zero-filled page at the end of the
    /// file, returning its id.
    pub fn add_page(&mut self) -> io::Result<PageID> {
        let id = self.n_pages as PageID;
        self.write_page(id, &Page::new())?;
        self.n_pages += 1;
        Ok(id)
    }

    pub fn get_page(&self, id: PageID) -> io::Result<Page> {
        let mut buf = [0u8; PAGESIZE];
        let offset = PAGESIZE as i64 * i64::from(id);
        read_exact_at(self.file.as_raw_fd(), &mut buf, offset)?;
        Ok(Page::from_bytes(buf))
    }

    pub fn put_page(&mut self, id: PageID, page: &Page) -> io::Result<()> {
        self.write_page(id, page)
    }

    fn write_page(&mut self, id: PageID, page: &Page) -> io::Result<()> {
        let offset = PAGESIZE as i64 * i64::from(id);
        let buf = page.as_bytes();
        write_all_at(self.file.as_raw_fd(), &buf, offset)
    }
}

fn read_exact_at(fd: std::os::fd::RawFd, buf: &mut [u8], mut offset: i64) -> io::Result<()> {
    let mut read = 0;
    while read < buf.len() {
        let n = pread(fd, &mut buf[read..], offset).map_err(io::Error::from)?;
        if n == 0 {
            // Reading past the end of a just-allocated page: treat as zeros.
            break;
        }
        read += n;
        offset += n as i64;
    }
    Ok(())
}

fn write_all_at(fd: std::os::fd::RawFd, buf: &[u8], mut offset: i64) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = pwrite(fd, &buf[written..], offset).map_err(io::Error::from)?;
        written += n;
        offset += n as i64;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    struct CleanUp(&'static str);
    impl Drop for CleanUp {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(self.0);
        }
    }

    #[test]
    fn add_get_put_roundtrip() {
        let _cleanup = CleanUp("test_paged_file.tmp");
        let mut pf = PagedFile::create("test_paged_file.tmp").unwrap();

        let id0 = pf.add_page().unwrap();
        let id1 = pf.add_page().unwrap();
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);
        assert_eq!(pf.n_pages(), 2);

        let mut p = pf.get_page(id1).unwrap();
        assert!(p.add_tuple(b"hello, world"));
        pf.put_page(id1, &p).unwrap();

        let back = pf.get_page(id1).unwrap();
        assert_eq!(back.tuples().next(), Some(&b"hello, world"[..]));

        let untouched = pf.get_page(id0).unwrap();
        assert_eq!(untouched.ntuples(), 0);
    }

    #[test]
    fn reopen_reads_back_state() {
        let _cleanup = CleanUp("test_paged_file_reopen.tmp");
        {
            let mut pf = PagedFile::create("test_paged_file_reopen.tmp").unwrap();
            let id = pf.add_page().unwrap();
            let mut p = pf.get_page(id).unwrap();
            p.add_tuple(b"persisted");
            pf.put_page(id, &p).unwrap();
        }

        let pf = PagedFile::open("test_paged_file_reopen.tmp", false).unwrap();
        assert_eq!(pf.n_pages(), 1);
        let p = pf.get_page(0).unwrap();
        assert_eq!(p.tuples().next(), Some(&b"persisted"[..]));
    }
}
