//! Block header layout.
//!
//! Every block starts with a header written directly into the arena bytes.
//! All fields are native-endian `u32`:
//!
//! ```text
//!   allocated block                free block
//!   ┌──────────┬──────────┐        ┌──────────┬──────────┬──────────┬──────────┐
//!   │ tag      │ size     │        │ tag      │ size     │ next     │ prev     │
//!   │ ALLOC    │ hdr+data │        │ FREE     │ hdr+data │ offset   │ offset   │
//!   └──────────┴──────────┘        └──────────┴──────────┴──────────┴──────────┘
//!   0          4          8        0          4          8          12         16
//! ```
//!
//! The accessors here take the arena as a byte slice and return `None`
//! whenever a field would fall outside it, so a corrupt offset can never
//! cause an out-of-bounds access.

/// Size of an allocated block header in bytes.
pub const ALLOC_HEADER_SIZE: u32 = 8;

/// Size of a free block header in bytes.
pub const FREE_HEADER_SIZE: u32 = 16;

const TAG_FIELD: usize = 0;
const SIZE_FIELD: usize = 4;
const NEXT_FIELD: usize = 8;
const PREV_FIELD: usize = 12;

/// Block state marker stored in the first word of every header.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Block is on the free list.
    Free = 0xDEAD_BEEF,
    /// Block belongs to a caller.
    Allocated = 0xBEEF_DEAD,
}

impl Tag {
    /// Decodes a raw tag word. Any value other than the two markers is
    /// corruption.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Tag> {
        match raw {
            0xDEAD_BEEF => Some(Tag::Free),
            0xBEEF_DEAD => Some(Tag::Allocated),
            _ => None,
        }
    }

    /// The raw word written into the arena.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// The two fields every header shares, undecoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub tag: u32,
    pub size: u32,
}

/// Links of a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Links {
    pub next: u32,
    pub prev: u32,
}

fn field(offset: u32, field: usize) -> Option<std::ops::Range<usize>> {
    let start = (offset as usize).checked_add(field)?;
    Some(start..start.checked_add(4)?)
}

fn read_word(arena: &[u8], offset: u32, at: usize) -> Option<u32> {
    let bytes = arena.get(field(offset, at)?)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

fn write_word(arena: &mut [u8], offset: u32, at: usize, value: u32) -> Option<()> {
    arena
        .get_mut(field(offset, at)?)?
        .copy_from_slice(&value.to_ne_bytes());
    Some(())
}

pub(crate) fn read_raw(arena: &[u8], offset: u32) -> Option<RawHeader> {
    Some(RawHeader {
        tag: read_word(arena, offset, TAG_FIELD)?,
        size: read_word(arena, offset, SIZE_FIELD)?,
    })
}

pub(crate) fn read_links(arena: &[u8], offset: u32) -> Option<Links> {
    Some(Links {
        next: read_word(arena, offset, NEXT_FIELD)?,
        prev: read_word(arena, offset, PREV_FIELD)?,
    })
}

pub(crate) fn write_allocated(arena: &mut [u8], offset: u32, size: u32) -> Option<()> {
    write_word(arena, offset, TAG_FIELD, Tag::Allocated.raw())?;
    write_word(arena, offset, SIZE_FIELD, size)
}

pub(crate) fn write_free(arena: &mut [u8], offset: u32, size: u32, links: Links) -> Option<()> {
    // All-or-nothing: never leave a half-written header behind.
    if field(offset, PREV_FIELD)?.end > arena.len() {
        return None;
    }
    write_word(arena, offset, TAG_FIELD, Tag::Free.raw())?;
    write_word(arena, offset, SIZE_FIELD, size)?;
    write_word(arena, offset, NEXT_FIELD, links.next)?;
    write_word(arena, offset, PREV_FIELD, links.prev)
}

pub(crate) fn write_size(arena: &mut [u8], offset: u32, size: u32) -> Option<()> {
    write_word(arena, offset, SIZE_FIELD, size)
}

pub(crate) fn write_next(arena: &mut [u8], offset: u32, next: u32) -> Option<()> {
    write_word(arena, offset, NEXT_FIELD, next)
}

pub(crate) fn write_prev(arena: &mut [u8], offset: u32, prev: u32) -> Option<()> {
    write_word(arena, offset, PREV_FIELD, prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        assert_eq!(Tag::from_raw(Tag::Free.raw()), Some(Tag::Free));
        assert_eq!(Tag::from_raw(Tag::Allocated.raw()), Some(Tag::Allocated));
        assert_eq!(Tag::from_raw(0), None);
        assert_eq!(Tag::from_raw(0xDEAD_BEEE), None);
    }

    #[test]
    fn test_free_header_layout() {
        let mut arena = vec![0u8; 64];
        write_free(&mut arena, 16, 48, Links { next: 16, prev: 16 }).unwrap();

        assert_eq!(
            read_raw(&arena, 16),
            Some(RawHeader {
                tag: Tag::Free.raw(),
                size: 48
            })
        );
        assert_eq!(read_links(&arena, 16), Some(Links { next: 16, prev: 16 }));
        assert_eq!(&arena[20..24], &48u32.to_ne_bytes());
    }

    #[test]
    fn test_allocated_header_leaves_payload_alone() {
        let mut arena = vec![0xAAu8; 32];
        write_allocated(&mut arena, 0, 32).unwrap();

        assert_eq!(read_raw(&arena, 0).map(|h| h.size), Some(32));
        assert!(arena[8..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_out_of_bounds_is_none() {
        let mut arena = vec![0u8; 32];

        assert_eq!(read_raw(&arena, 28), None);
        assert_eq!(read_links(&arena, 20), None);
        assert_eq!(read_raw(&arena, u32::MAX), None);
        assert_eq!(write_next(&mut arena, 24, 0), None);
        assert_eq!(
            write_free(&mut arena, 20, 12, Links { next: 0, prev: 0 }),
            None
        );
        assert!(arena.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_field_updates() {
        let mut arena = vec![0u8; 32];
        write_free(&mut arena, 0, 32, Links { next: 0, prev: 0 }).unwrap();

        write_size(&mut arena, 0, 24).unwrap();
        write_next(&mut arena, 0, 8).unwrap();
        write_prev(&mut arena, 0, 4).unwrap();

        assert_eq!(read_raw(&arena, 0).map(|h| h.size), Some(24));
        assert_eq!(read_links(&arena, 0), Some(Links { next: 8, prev: 4 }));
    }
}
