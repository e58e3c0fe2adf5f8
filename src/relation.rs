//! Owns the three backing files of a multi-attribute linear-hashed file
//! (info, data, overflow) and the linear-hash state.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bits::{self, Bits};
use crate::chvec::{self, ChoiceVector};
use crate::disk::PagedFile;
use crate::error::{RelnError, Result};
use crate::hash;
use crate::page::{PageID, NO_PAGE, PAGESIZE};

const INFO_HEADER_FIELDS: usize = 5;
const INFO_HEADER_SIZE: usize = INFO_HEADER_FIELDS * 4;
const INFO_FILE_SIZE: usize = INFO_HEADER_SIZE + chvec::MAXCHVEC * chvec::CHVEC_ITEM_SIZE;

/// Parameters for creating a new relation.
#[derive(Debug, Clone)]
pub struct RelationConfig {
    pub nattrs: u32,
    pub depth: u32,
    pub choice_vector: String,
    /// Divisor in the insertion threshold `PAGESIZE / (split_divisor *
    /// nattrs)`.
    pub split_divisor: u32,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self { nattrs: 1, depth: 0, choice_vector: String::new(), split_divisor: 10 }
    }
}

/// Read-only-vs-read-write open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

pub struct Relation {
    nattrs: u32,
    depth: u32,
    sp: u32,
    npages: u32,
    ntups: u32,
    cv: ChoiceVector,
    insertions: u32,
    split_divisor: u32,
    mode: Mode,

    info: File,
    data: PagedFile,
    ovflow: PagedFile,
}

/// Per-page diagnostics for one bucket's chain.
#[derive(Debug, Clone)]
pub struct PageStats {
    pub page_id: PageID,
    pub ntuples: u32,
    pub free_bytes: usize,
    pub ovflow: PageID,
}

#[derive(Debug, Clone)]
pub struct BucketStats {
    pub bucket: PageID,
    pub chain: Vec<PageStats>,
}

#[derive(Debug, Clone)]
pub struct RelationStats {
    pub nattrs: u32,
    pub depth: u32,
    pub sp: u32,
    pub npages: u32,
    pub ntuples: u32,
    pub buckets: Vec<BucketStats>,
}

fn info_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{name}.info"))
}
fn data_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{name}.data"))
}
fn ovflow_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{name}.ovflow"))
}

/// True iff an `.info` file already exists for `name`.
pub fn exists(name: &str) -> bool {
    info_path(name).is_file()
}

impl Relation {
    /// Creates the three backing files for a brand-new relation with
    /// `config.npages = 2^config.depth` primary data pages, and opens it
    /// for writing.
    pub fn create(name: &str, config: RelationConfig) -> Result<Relation> {
        if config.nattrs == 0 {
            return Err(RelnError::Configuration("nattrs must be positive".into()));
        }
        let cv = ChoiceVector::parse(&config.choice_vector, config.nattrs)?;
        let npages = 1u32 << config.depth;

        let info = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(info_path(name))?;
        let mut data = PagedFile::create(data_path(name))?;
        let ovflow = PagedFile::create(ovflow_path(name))?;

        for _ in 0..npages {
            data.add_page()?;
        }

        let mut rel = Relation {
            nattrs: config.nattrs,
            depth: config.depth,
            sp: 0,
            npages,
            ntups: 0,
            cv,
            insertions: 0,
            split_divisor: config.split_divisor.max(1),
            mode: Mode::Write,
            info,
            data,
            ovflow,
        };
        rel.write_info()?;
        Ok(rel)
    }

    /// Opens an existing relation, reading its persisted state from the
    /// info file.
    pub fn open(name: &str, mode: Mode) -> Result<Relation> {
        let writable = mode == Mode::Write;
        let mut info =
            OpenOptions::new().read(true).write(writable).open(info_path(name))?;

        let mut header = [0u8; INFO_FILE_SIZE];
        info.read_exact(&mut header).map_err(|_| {
            RelnError::Configuration(format!("'{name}.info' is not a valid relation info file"))
        })?;

        let field = |i: usize| u32::from_be_bytes(header[i * 4..i * 4 + 4].try_into().unwrap());
        let nattrs = field(0);
        let depth = field(1);
        let sp = field(2);
        let npages = field(3);
        let ntups = field(4);
        let cv = ChoiceVector::from_bytes(&header[INFO_HEADER_SIZE..])?;

        let data = PagedFile::open(data_path(name), writable)?;
        let ovflow = PagedFile::open(ovflow_path(name), writable)?;

        Ok(Relation {
            nattrs,
            depth,
            sp,
            npages,
            ntups,
            cv,
            insertions: 0,
            split_divisor: 10,
            mode,
            info,
            data,
            ovflow,
        })
    }

    /// Flushes state (if opened for writing) and releases the relation.
    /// In read mode the info file is simply discarded.
    pub fn close(mut self) -> Result<()> {
        if self.mode == Mode::Write {
            self.write_info()?;
            // Already flushed above: mark read-only so the `Drop` impl
            // (which still runs to close the file handles) doesn't write
            // the info file a second time.
            self.mode = Mode::Read;
        }
        Ok(())
    }

    fn write_info(&mut self) -> Result<()> {
        self.info.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(INFO_FILE_SIZE);
        for v in [self.nattrs, self.depth, self.sp, self.npages, self.ntups] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf.extend_from_slice(&self.cv.to_bytes());
        self.info.write_all(&buf)?;
        self.info.flush()?;
        Ok(())
    }

    pub fn nattrs(&self) -> u32 {
        self.nattrs
    }
    pub fn depth(&self) -> u32 {
        self.depth
    }
    pub fn splitp(&self) -> u32 {
        self.sp
    }
    pub fn npages(&self) -> u32 {
        self.npages
    }
    pub fn ntuples(&self) -> u32 {
        self.ntups
    }
    pub fn choice_vector(&self) -> &ChoiceVector {
        &self.cv
    }

    fn split_attributes<'a>(&self, tuple: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        let parts: Vec<&[u8]> = tuple.split(|&b| b == b',').collect();
        if parts.len() != self.nattrs as usize {
            return Err(RelnError::Configuration(format!(
                "tuple has {} attributes, relation has {}",
                parts.len(),
                self.nattrs
            )));
        }
        Ok(parts)
    }

    /// Computes the composite hash of a raw tuple byte string.
    pub(crate) fn tuple_hash(&self, tuple: &[u8]) -> Result<Bits> {
        let attrs = self.split_attributes(tuple)?;
        let attr_hashes: Vec<Bits> = attrs.iter().map(|a| hash::hash(a)).collect();
        Ok(chvec::composite_hash(&self.cv, &attr_hashes))
    }

    /// Resolves a composite hash to a bucket address given the relation's
    /// current directory depth and split pointer.
    pub fn bucket_address(h: Bits, d: u32, sp: u32) -> PageID {
        if d == 0 {
            return 0;
        }
        let mut p = bits::get_lower(h, d);
        if p < sp {
            p = bits::get_lower(h, d + 1);
        }
        p as PageID
    }

    fn threshold(&self) -> u32 {
        (PAGESIZE as u32 / (self.split_divisor * self.nattrs)).max(1)
    }

    /// Inserts `tuple` (a comma-separated attribute string). Returns the
    /// primary-page bucket id the tuple addresses to, even if it
    /// physically landed in an overflow page.
    pub fn insert(&mut self, tuple: &str) -> Result<PageID> {
        let bytes = tuple.as_bytes();
        // Validate before any state mutation so a Configuration error
        // never disturbs `ntups`/`insertions`.
        self.split_attributes(bytes)?;

        if self.insertions >= self.threshold() {
            self.split()?;
            self.sp += 1;
            if self.sp == (1u32 << self.depth) {
                self.sp = 0;
                self.depth += 1;
            }
            self.insertions = 0;
        }

        let h = self.tuple_hash(bytes)?;
        let p = Self::bucket_address(h, self.depth, self.sp);

        let mut page = self.data.get_page(p)?;
        if page.add_tuple(bytes) {
            self.data.put_page(p, &page)?;
        } else {
            self.append_to_overflow_chain(p, bytes)?;
        }

        self.ntups += 1;
        self.insertions += 1;
        Ok(p)
    }

    /// Walks (or extends) the overflow chain rooted at primary page `p`
    /// until `tuple` fits somewhere.
    fn append_to_overflow_chain(&mut self, p: PageID, tuple: &[u8]) -> Result<()> {
        let mut primary = self.data.get_page(p)?;

        if primary.ovflow() == NO_PAGE {
            let newp = self.ovflow.add_page()?;
            let mut newpg = self.ovflow.get_page(newp)?;
            if !newpg.add_tuple(tuple) {
                return Err(RelnError::Capacity {
                    tuple_len: tuple.len(),
                    page_capacity: PAGESIZE,
                });
            }
            self.ovflow.put_page(newp, &newpg)?;
            primary.set_ovflow(newp);
            self.data.put_page(p, &primary)?;
            return Ok(());
        }

        let mut cur = primary.ovflow();
        loop {
            let mut curpg = self.ovflow.get_page(cur)?;
            if curpg.add_tuple(tuple) {
                self.ovflow.put_page(cur, &curpg)?;
                return Ok(());
            }
            if curpg.ovflow() == NO_PAGE {
                let newp = self.ovflow.add_page()?;
                let mut newpg = self.ovflow.get_page(newp)?;
                if !newpg.add_tuple(tuple) {
                    return Err(RelnError::Capacity {
                        tuple_len: tuple.len(),
                        page_capacity: PAGESIZE,
                    });
                }
                self.ovflow.put_page(newp, &newpg)?;
                curpg.set_ovflow(newp);
                self.ovflow.put_page(cur, &curpg)?;
                return Ok(());
            }
            cur = curpg.ovflow();
        }
    }

    /// Location of a page: either a primary data page or an overflow page.
    fn split(&mut self) -> Result<()> {
        let d = self.depth;
        let sp = self.sp;
        let oldp: PageID = sp as PageID;
        let newp: PageID = (sp + (1u32 << d)) as PageID;

        let allocated = self.data.add_page()?;
        debug_assert_eq!(allocated, newp, "split must allocate the expected bucket id");
        self.npages += 1;

        let mut new_tail = Loc::Data(newp);
        let mut old_loc = Loc::Data(oldp);

        loop {
            let mut old_page = self.get(old_loc)?;

            let mut offset = 0u32;
            while offset < old_page.free_offset() {
                let bytes = old_page.tuple_at(offset).to_vec();
                if bytes.is_empty() {
                    offset += 1;
                    continue;
                }
                let tuple_len = bytes.len() as u32;
                let h = self.tuple_hash(&bytes)?;
                let stays = bits::get_lower(h, d + 1) == sp;

                if stays {
                    offset += tuple_len + 1;
                } else {
                    self.move_to_new_bucket(&mut new_tail, &bytes)?;
                    old_page.remove_at(offset);
                    self.put(old_loc, &old_page)?;
                    // Don't advance `offset`: the next tuple now sits here.
                }
            }
            self.put(old_loc, &old_page)?;

            match old_page.ovflow() {
                NO_PAGE => break,
                next => old_loc = Loc::Ovflow(next),
            }
        }

        Ok(())
    }

    fn move_to_new_bucket(&mut self, tail: &mut Loc, tuple: &[u8]) -> Result<()> {
        let mut page = self.get(*tail)?;
        if page.add_tuple(tuple) {
            self.put(*tail, &page)?;
            return Ok(());
        }

        let newp = self.ovflow.add_page()?;
        let mut newpg = self.ovflow.get_page(newp)?;
        if !newpg.add_tuple(tuple) {
            return Err(RelnError::Capacity { tuple_len: tuple.len(), page_capacity: PAGESIZE });
        }
        self.ovflow.put_page(newp, &newpg)?;

        page.set_ovflow(newp);
        self.put(*tail, &page)?;
        *tail = Loc::Ovflow(newp);
        Ok(())
    }

    fn get(&self, loc: Loc) -> Result<crate::page::Page> {
        Ok(match loc {
            Loc::Data(id) => self.data.get_page(id)?,
            Loc::Ovflow(id) => self.ovflow.get_page(id)?,
        })
    }

    fn put(&mut self, loc: Loc, page: &crate::page::Page) -> Result<()> {
        match loc {
            Loc::Data(id) => self.data.put_page(id, page)?,
            Loc::Ovflow(id) => self.ovflow.put_page(id, page)?,
        }
        Ok(())
    }

    pub(crate) fn get_data_page(&self, id: PageID) -> Result<crate::page::Page> {
        Ok(self.data.get_page(id)?)
    }

    pub(crate) fn get_ovflow_page(&self, id: PageID) -> Result<crate::page::Page> {
        Ok(self.ovflow.get_page(id)?)
    }

    /// Walks every bucket and its overflow chain, reporting per-page
    /// occupancy and linkage.
    pub fn stats(&self) -> Result<RelationStats> {
        let mut buckets = Vec::with_capacity(self.npages as usize);
        for bucket in 0..self.npages as PageID {
            let mut chain = Vec::new();
            let page = self.data.get_page(bucket)?;
            chain.push(PageStats {
                page_id: bucket,
                ntuples: page.ntuples(),
                free_bytes: page.free_space(),
                ovflow: page.ovflow(),
            });
            let mut next = page.ovflow();
            while next != NO_PAGE {
                let p = self.ovflow.get_page(next)?;
                chain.push(PageStats {
                    page_id: next,
                    ntuples: p.ntuples(),
                    free_bytes: p.free_space(),
                    ovflow: p.ovflow(),
                });
                next = p.ovflow();
            }
            buckets.push(BucketStats { bucket, chain });
        }

        Ok(RelationStats {
            nattrs: self.nattrs,
            depth: self.depth,
            sp: self.sp,
            npages: self.npages,
            ntuples: self.ntups,
            buckets,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Loc {
    Data(PageID),
    Ovflow(PageID),
}

impl Drop for Relation {
    fn drop(&mut self) {
        if self.mode == Mode::Write {
            if let Err(e) = self.write_info() {
                eprintln!("ERROR: could not persist relation info on drop - {e}");
            }
        }
    }
}
