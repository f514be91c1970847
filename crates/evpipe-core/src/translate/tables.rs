// Evpipe Remap Tables
// Static key remapping for the remote-control profile

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::input::codes::KEY_LEFTCTRL;

/// Where one remote key lands on the virtual keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapEntry {
    /// Emitted key code
    pub code: u16,
    /// Modifier held around the emitted key
    pub modifier: Option<u16>,
    /// The remote sends a stray pointer event after this key
    pub buggy_mouse: bool,
}

impl RemapEntry {
    pub const fn to(code: u16) -> Self {
        Self {
            code,
            modifier: None,
            buggy_mouse: false,
        }
    }

    pub const fn with_modifier(code: u16, modifier: u16) -> Self {
        Self {
            code,
            modifier: Some(modifier),
            buggy_mouse: false,
        }
    }

    pub const fn buggy_mouse(mut self) -> Self {
        self.buggy_mouse = true;
        self
    }
}

// (remote code, entry)
const DEFAULT_REMAP: &[(u16, RemapEntry)] = &[
    (28, RemapEntry::to(28)),    // return
    (103, RemapEntry::to(103)),  // up
    (105, RemapEntry::to(105)),  // left
    (106, RemapEntry::to(106)),  // right
    (108, RemapEntry::to(108)),  // down
    (113, RemapEntry::to(113)),  // mute
    (114, RemapEntry::to(114)),  // volumedown
    (115, RemapEntry::to(115)),  // volumeup
    (139, RemapEntry::to(16).buggy_mouse()), // settings -> q (queue)
    (167, RemapEntry::with_modifier(19, KEY_LEFTCTRL)), // record -> ctrl+r
    (272, RemapEntry::to(28)),   // left click without pointer -> return
    (362, RemapEntry::to(23).buggy_mouse()), // program guide -> i (info)
    (398, RemapEntry::with_modifier(2, KEY_LEFTCTRL)), // red -> ctrl+1
    (399, RemapEntry::with_modifier(3, KEY_LEFTCTRL)), // green -> ctrl+2
    (400, RemapEntry::with_modifier(4, KEY_LEFTCTRL)), // yellow -> ctrl+3
    (401, RemapEntry::with_modifier(5, KEY_LEFTCTRL)), // blue -> ctrl+4
    (402, RemapEntry::to(102)),  // channel up -> home
    (403, RemapEntry::to(107)),  // channel down -> end
    (412, RemapEntry::to(14)),   // back -> backspace
    (428, RemapEntry::to(57)),   // mic -> space (play/pause)
    (773, RemapEntry::to(1).buggy_mouse()), // home -> esc
    (832, RemapEntry::to(50)),   // broadcast selector -> m (context menu)
    (845, RemapEntry::to(50)),
    (858, RemapEntry::to(50)),
    (833, RemapEntry::to(2)),    // digits 1..10
    (834, RemapEntry::to(3)),
    (835, RemapEntry::to(4)),
    (836, RemapEntry::to(5)),
    (837, RemapEntry::to(6)),
    (838, RemapEntry::to(7)),
    (839, RemapEntry::to(8)),
    (840, RemapEntry::to(9)),
    (841, RemapEntry::to(10)),
    (842, RemapEntry::to(11)),
    (872, RemapEntry::to(2)),    // alternate digit bank 1..10
    (873, RemapEntry::to(3)),
    (874, RemapEntry::to(4)),
    (875, RemapEntry::to(5)),
    (876, RemapEntry::to(6)),
    (877, RemapEntry::to(7)),
    (878, RemapEntry::to(8)),
    (879, RemapEntry::to(9)),
    (880, RemapEntry::to(10)),
    (881, RemapEntry::to(11)),
    (994, RemapEntry::to(46)),   // subtitles -> c (context menu)
    (1037, RemapEntry::to(19)),  // streaming app 1 -> r (rewind)
    (1038, RemapEntry::to(33)),  // streaming app 2 -> f (fast forward)
];

static DEFAULT_TABLE: LazyLock<HashMap<u16, RemapEntry>> =
    LazyLock::new(|| DEFAULT_REMAP.iter().copied().collect());

/// Immutable remap table, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapTable {
    entries: HashMap<u16, RemapEntry>,
}

impl RemapTable {
    /// Built-in table with overrides applied on top.
    pub fn with_overrides(overrides: impl IntoIterator<Item = (u16, RemapEntry)>) -> Self {
        let mut entries = DEFAULT_TABLE.clone();
        entries.extend(overrides);
        Self { entries }
    }

    pub fn get(&self, code: u16) -> Option<&RemapEntry> {
        self.entries.get(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &RemapEntry)> {
        self.entries.iter().map(|(code, entry)| (*code, entry))
    }

    /// Every key code the virtual keyboard may emit, sorted and deduplicated.
    pub fn output_codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self
            .entries
            .values()
            .flat_map(|e| std::iter::once(e.code).chain(e.modifier))
            .collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}

impl Default for RemapTable {
    fn default() -> Self {
        Self::with_overrides([])
    }
}

impl FromIterator<(u16, RemapEntry)> for RemapTable {
    fn from_iter<I: IntoIterator<Item = (u16, RemapEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
