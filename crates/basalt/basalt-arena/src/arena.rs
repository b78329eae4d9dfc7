use std::fs::File;

use memmap2::{Mmap, MmapMut};
use serde::Deserialize;

/// How the arena is used by this process and, simultaneously, by others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaMode {
    /// The arena may be shared by other processes. The in-arena lock and
    /// notification primitives are active.
    #[default]
    Shared,
    /// A promise that no other process accesses the arena. Locks and
    /// notification are elided.
    Exclusive,
    /// A promise that no other process writes the arena, and neither does
    /// this one. Mapped privately.
    ReadOnly,
}

enum Backing {
    MapMut { map: MmapMut, _file: File },
    Map { _map: Mmap, _file: File },
    Heap(Box<[u8]>),
}

/// A contiguous memory buffer shared (or promised not to be) with other
/// processes.
///
/// The arena owns its backing for its whole lifetime; everything layered on
/// top works in integer offsets from [`Arena::as_ptr`] so the same bytes can
/// live at different addresses in different processes.
pub struct Arena {
    base: *mut u8,
    len: usize,
    mode: ArenaMode,
    _backing: Backing,
}

// All cross-thread mutation of arena bytes goes through the in-arena mutex
// owned by the transport layer; the arena itself only hands out the base
// pointer.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// A zeroed, process-private arena. Useful for tests and for embedders
    /// that want the transport without a file.
    pub fn heap(len: usize, mode: ArenaMode) -> Self {
        let mut buf = vec![0u8; len].into_boxed_slice();
        let base = buf.as_mut_ptr();
        Arena {
            base,
            len,
            mode,
            _backing: Backing::Heap(buf),
        }
    }

    pub(crate) fn from_map_mut(mut map: MmapMut, file: File, mode: ArenaMode) -> Self {
        let base = map.as_mut_ptr();
        let len = map.len();
        Arena {
            base,
            len,
            mode,
            _backing: Backing::MapMut { map, _file: file },
        }
    }

    pub(crate) fn from_map(map: Mmap, file: File) -> Self {
        // Never written through; the pointer type is for layout overlay only.
        let base = map.as_ptr() as *mut u8;
        let len = map.len();
        Arena {
            base,
            len,
            mode: ArenaMode::ReadOnly,
            _backing: Backing::Map { _map: map, _file: file },
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn mode(&self) -> ArenaMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_arena_is_zeroed() {
        let arena = Arena::heap(4096, ArenaMode::Exclusive);
        assert_eq!(arena.len(), 4096);
        let bytes = unsafe { std::slice::from_raw_parts(arena.as_ptr(), arena.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
