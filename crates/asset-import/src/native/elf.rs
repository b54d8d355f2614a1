//! ELF dynamic-section reader
//!
//! Only what dependency resolution needs: locate the `.dynamic` section through the
//! section header table and read its `DT_NEEDED` entries through the linked string
//! table. Handles 32- and 64-bit images in either byte order.
//!
//! ```text
//! ELF header ── e_shoff ──► section headers ──► .dynamic ──► [d_tag, d_val]...
//!                                  │                 │ sh_link
//!                                  ▼                 ▼
//!                              .shstrtab          .dynstr  ◄── d_val (DT_NEEDED)
//! ```

use thiserror::Error;

/// ELF magic bytes
pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const SHT_DYNAMIC: u32 = 6;
const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;

/// Errors that can occur while reading an ELF image
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElfError {
    /// The file does not start with the ELF magic
    #[error("not an ELF file")]
    NotElf,

    /// Unknown class or data encoding byte
    #[error("unsupported ELF identification: class {class}, data {data}")]
    Unsupported { class: u8, data: u8 },

    /// A structure points outside the file
    #[error("truncated ELF file: {0} out of bounds")]
    Truncated(&'static str),

    /// No `.dynamic` section
    #[error("no .dynamic section")]
    MissingDynamicSection,

    /// A string table reference is malformed
    #[error("invalid string table reference at offset {0}")]
    BadString(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy)]
struct SectionHeader {
    name: u32,
    kind: u32,
    offset: u64,
    size: u64,
    link: u32,
}

struct ElfReader<'a> {
    data: &'a [u8],
    class: Class,
    big_endian: bool,
}

impl<'a> ElfReader<'a> {
    fn new(data: &'a [u8]) -> Result<Self, ElfError> {
        if data.len() < 16 || data[..4] != ELF_MAGIC {
            return Err(ElfError::NotElf);
        }
        let class = match data[4] {
            ELFCLASS32 => Class::Elf32,
            ELFCLASS64 => Class::Elf64,
            other => {
                return Err(ElfError::Unsupported {
                    class: other,
                    data: data[5],
                })
            }
        };
        let big_endian = match data[5] {
            ELFDATA2LSB => false,
            ELFDATA2MSB => true,
            other => {
                return Err(ElfError::Unsupported {
                    class: data[4],
                    data: other,
                })
            }
        };
        Ok(Self {
            data,
            class,
            big_endian,
        })
    }

    fn bytes<const N: usize>(&self, offset: u64, what: &'static str) -> Result<[u8; N], ElfError> {
        let start = usize::try_from(offset).map_err(|_| ElfError::Truncated(what))?;
        let end = start.checked_add(N).ok_or(ElfError::Truncated(what))?;
        let slice = self.data.get(start..end).ok_or(ElfError::Truncated(what))?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn u16(&self, offset: u64, what: &'static str) -> Result<u16, ElfError> {
        let b = self.bytes::<2>(offset, what)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32(&self, offset: u64, what: &'static str) -> Result<u32, ElfError> {
        let b = self.bytes::<4>(offset, what)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    fn u64(&self, offset: u64, what: &'static str) -> Result<u64, ElfError> {
        let b = self.bytes::<8>(offset, what)?;
        Ok(if self.big_endian {
            u64::from_be_bytes(b)
        } else {
            u64::from_le_bytes(b)
        })
    }

    /// Address-sized field, widened to 64 bits.
    fn word(&self, offset: u64, what: &'static str) -> Result<u64, ElfError> {
        match self.class {
            Class::Elf32 => self.u32(offset, what).map(u64::from),
            Class::Elf64 => self.u64(offset, what),
        }
    }

    fn word_size(&self) -> u64 {
        match self.class {
            Class::Elf32 => 4,
            Class::Elf64 => 8,
        }
    }

    fn section_headers(&self) -> Result<(Vec<SectionHeader>, u16), ElfError> {
        let (shoff_at, rest_at) = match self.class {
            Class::Elf32 => (0x20, 0x2E),
            Class::Elf64 => (0x28, 0x3A),
        };
        let shoff = self.word(shoff_at, "e_shoff")?;
        let shentsize = u64::from(self.u16(rest_at, "e_shentsize")?);
        let shnum = self.u16(rest_at + 2, "e_shnum")?;
        let shstrndx = self.u16(rest_at + 4, "e_shstrndx")?;

        let mut headers = Vec::with_capacity(usize::from(shnum));
        for i in 0..u64::from(shnum) {
            let base = shoff
                .checked_add(i * shentsize)
                .ok_or(ElfError::Truncated("section header"))?;
            let header = match self.class {
                Class::Elf32 => SectionHeader {
                    name: self.u32(base, "sh_name")?,
                    kind: self.u32(base + 4, "sh_type")?,
                    offset: u64::from(self.u32(base + 16, "sh_offset")?),
                    size: u64::from(self.u32(base + 20, "sh_size")?),
                    link: self.u32(base + 24, "sh_link")?,
                },
                Class::Elf64 => SectionHeader {
                    name: self.u32(base, "sh_name")?,
                    kind: self.u32(base + 4, "sh_type")?,
                    offset: self.u64(base + 24, "sh_offset")?,
                    size: self.u64(base + 32, "sh_size")?,
                    link: self.u32(base + 40, "sh_link")?,
                },
            };
            headers.push(header);
        }
        Ok((headers, shstrndx))
    }

    /// NUL-terminated string at `index` within a string table section.
    fn string(&self, table: &SectionHeader, index: u64) -> Result<String, ElfError> {
        if index >= table.size {
            return Err(ElfError::BadString(index));
        }
        let bad = || ElfError::BadString(index);
        let start = table
            .offset
            .checked_add(index)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(bad)?;
        let end = table
            .offset
            .checked_add(table.size)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(bad)?
            .min(self.data.len());
        let bytes = self.data.get(start..end).ok_or_else(bad)?;
        let len = bytes.iter().position(|&b| b == 0).ok_or_else(bad)?;
        Ok(String::from_utf8_lossy(&bytes[..len]).into_owned())
    }
}

/// Return the `DT_NEEDED` names of an ELF image, in declaration order.
pub fn needed_libraries(data: &[u8]) -> Result<Vec<String>, ElfError> {
    let reader = ElfReader::new(data)?;
    let (sections, shstrndx) = reader.section_headers()?;

    let names = sections.get(usize::from(shstrndx));
    let dynamic = sections
        .iter()
        .find(|s| match names {
            Some(names) => reader.string(names, u64::from(s.name)).ok().as_deref() == Some(".dynamic"),
            None => false,
        })
        .or_else(|| sections.iter().find(|s| s.kind == SHT_DYNAMIC))
        .ok_or(ElfError::MissingDynamicSection)?;

    let strtab = sections
        .get(dynamic.link as usize)
        .ok_or(ElfError::Truncated("dynamic string table"))?;

    let entry_size = reader.word_size() * 2;
    let mut needed = Vec::new();
    let mut offset = dynamic.offset;
    let end = dynamic
        .offset
        .checked_add(dynamic.size)
        .filter(|&end| end <= data.len() as u64)
        .ok_or(ElfError::Truncated("dynamic section"))?;
    while let Some(next) = offset.checked_add(entry_size).filter(|&next| next <= end) {
        let tag = reader.word(offset, "d_tag")?;
        let value_at = offset
            .checked_add(reader.word_size())
            .ok_or(ElfError::Truncated("d_val"))?;
        let value = reader.word(value_at, "d_val")?;
        if tag == DT_NULL {
            break;
        }
        if tag == DT_NEEDED {
            needed.push(reader.string(strtab, value)?);
        }
        offset = next;
    }
    Ok(needed)
}
