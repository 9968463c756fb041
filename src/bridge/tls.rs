//! Static TLS handoff between the host runtime and a bridged libc.
//!
//! The main thread is bootstrapped in three phases that must run in order,
//! once per process:
//!
//! 1. [`init_main_thread_early`] borrows the host's thread control block.
//! 2. [`EarlyInit::init_main_thread_late`] borrows the host's per-thread data
//!    and installs a fresh stack guard.
//! 3. [`LateInit::init_main_thread_final`] lays out static TLS for future
//!    threads, leaks the template image and registers it with the host.
//!
//! Each phase consumes the value returned by the previous one.

use std::ffi::c_void;
use std::mem;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use static_assertions::const_assert_eq;
use thiserror::Error;

pub const MIN_TLS_SLOT: c_int = -2;
pub const TLS_SLOT_NATIVE_BRIDGE_GUEST_STATE: c_int = -2;
pub const TLS_SLOT_BIONIC_TLS: c_int = -1;
pub const TLS_SLOT_DTV: c_int = 0;
pub const TLS_SLOT_THREAD_ID: c_int = 1;
pub const TLS_SLOT_APP: c_int = 2;
pub const TLS_SLOT_STACK_GUARD: c_int = 5;
pub const TLS_SLOT_ART_THREAD_SELF: c_int = 7;
pub const MAX_TLS_SLOT: c_int = 7;

pub const TLS_SLOT_COUNT: usize = (MAX_TLS_SLOT - MIN_TLS_SLOT + 1) as usize;

const WORD: usize = mem::size_of::<usize>();

/// What the bridged libc hands to the host for laying out new threads.
///
/// The host copies this struct; `init_img` stays valid for the life of the
/// process.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticTlsConfig {
    /// Size of a thread's static TLS block.
    pub size: usize,
    /// Offset of the thread pointer within the block.
    pub tpoff: usize,
    /// Template copied into every new block.
    pub init_img: *const c_void,
    pub tls_slot_thread_id: c_int,
    pub tls_slot_bionic_tls: c_int,
}

const_assert_eq!(
    mem::size_of::<StaticTlsConfig>(),
    3 * mem::size_of::<usize>() + 2 * mem::size_of::<c_int>()
);
const_assert_eq!(mem::offset_of!(StaticTlsConfig, size), 0);
const_assert_eq!(mem::offset_of!(StaticTlsConfig, tpoff), WORD);
const_assert_eq!(mem::offset_of!(StaticTlsConfig, init_img), 2 * WORD);
const_assert_eq!(mem::offset_of!(StaticTlsConfig, tls_slot_thread_id), 3 * WORD);
const_assert_eq!(
    mem::offset_of!(StaticTlsConfig, tls_slot_bionic_tls),
    3 * WORD + mem::size_of::<c_int>()
);

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("main thread TLS has already been bootstrapped in this process")]
    AlreadyBootstrapped,

    #[error("failed to generate the stack guard: {0}")]
    Entropy(getrandom::Error),

    #[error("TLS segment {index} has invalid alignment {align}")]
    BadAlignment { index: usize, align: usize },

    #[error("TLS segment {index} initialises {init} bytes but occupies only {mem_size}")]
    OversizedInit {
        index: usize,
        init: usize,
        mem_size: usize,
    },

    #[error("TLS segment {index} does not fit in the address space")]
    LayoutOverflow { index: usize },
}

/// One-shot flag for the bootstrap sequence.
#[derive(Debug, Default)]
pub struct BootstrapGuard {
    claimed: AtomicBool,
}

impl BootstrapGuard {
    pub const fn new() -> Self {
        BootstrapGuard {
            claimed: AtomicBool::new(false),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    fn claim(&self) -> Result<(), BootstrapError> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            Err(BootstrapError::AlreadyBootstrapped)
        } else {
            Ok(())
        }
    }
}

/// The TLS slots of one thread, indexed `MIN_TLS_SLOT..=MAX_TLS_SLOT`.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadControlBlock {
    slots: [usize; TLS_SLOT_COUNT],
}

impl ThreadControlBlock {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(slot: c_int) -> Option<usize> {
        if (MIN_TLS_SLOT..=MAX_TLS_SLOT).contains(&slot) {
            Some((slot - MIN_TLS_SLOT) as usize)
        } else {
            None
        }
    }

    pub fn get(&self, slot: c_int) -> Option<usize> {
        Self::index(slot).map(|i| self.slots[i])
    }

    fn set(&mut self, slot: c_int, value: usize) {
        if let Some(i) = Self::index(slot) {
            self.slots[i] = value;
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.slots.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }
}

/// Per-thread libc data whose address lives in `TLS_SLOT_BIONIC_TLS`.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct BionicTls {
    pub errno_value: c_int,
    pub locale: usize,
    pub scratch: [usize; 8],
}

/// The host's main thread, borrowed for the duration of the bootstrap.
#[derive(Debug)]
pub struct HostThread<'a> {
    pub tcb: &'a mut ThreadControlBlock,
    pub data: &'a mut BionicTls,
    /// Value stored in `TLS_SLOT_THREAD_ID`.
    pub thread_id: usize,
}

/// Receives the static TLS configuration.
pub trait HostRuntime {
    fn register_static_tls(&self, config: &StaticTlsConfig);
}

/// One module's `PT_TLS` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSegment {
    /// `.tdata`; the rest up to `mem_size` is `.tbss`.
    pub init_data: Vec<u8>,
    pub mem_size: usize,
    pub align: usize,
}

/// Placement of the slots and segments in a static TLS block.
///
/// The thread pointer points at slot 0; module segments follow the slots
/// (variant 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticTlsLayout {
    pub size: usize,
    pub align: usize,
    pub tpoff: usize,
    /// Offset of each segment from the thread pointer.
    pub segment_offsets: Vec<usize>,
}

/// `None` when rounding up overflows.
fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

impl StaticTlsLayout {
    pub fn compute(segments: &[TlsSegment]) -> Result<Self, BootstrapError> {
        let tpoff = (-MIN_TLS_SLOT) as usize * WORD;
        let mut cursor = (MAX_TLS_SLOT as usize + 1) * WORD;
        let mut align = WORD;
        let mut segment_offsets = Vec::with_capacity(segments.len());

        for (index, seg) in segments.iter().enumerate() {
            if seg.align == 0 || !seg.align.is_power_of_two() {
                return Err(BootstrapError::BadAlignment {
                    index,
                    align: seg.align,
                });
            }
            if seg.init_data.len() > seg.mem_size {
                return Err(BootstrapError::OversizedInit {
                    index,
                    init: seg.init_data.len(),
                    mem_size: seg.mem_size,
                });
            }
            let offset = align_up(cursor, seg.align)
                .ok_or(BootstrapError::LayoutOverflow { index })?;
            segment_offsets.push(offset);
            cursor = offset
                .checked_add(seg.mem_size)
                .ok_or(BootstrapError::LayoutOverflow { index })?;
            align = align.max(seg.align);
        }

        let size = tpoff
            .checked_add(cursor)
            .and_then(|end| align_up(end, WORD))
            .ok_or(BootstrapError::LayoutOverflow {
                index: segments.len().saturating_sub(1),
            })?;

        Ok(StaticTlsLayout {
            size,
            align,
            tpoff,
            segment_offsets,
        })
    }

    /// Image of a fresh block: zeroed slots, `.tdata` copied, `.tbss` zero.
    fn template(&self, segments: &[TlsSegment]) -> Vec<u8> {
        let mut image = vec![0u8; self.size];
        for (seg, offset) in segments.iter().zip(&self.segment_offsets) {
            let start = self.tpoff + offset;
            image[start..start + seg.init_data.len()].copy_from_slice(&seg.init_data);
        }
        image
    }
}

/// After phase 1.
#[derive(Debug)]
pub struct EarlyInit<'a> {
    thread: HostThread<'a>,
}

/// After phase 2.
#[derive(Debug)]
pub struct LateInit<'a> {
    thread: HostThread<'a>,
    stack_guard: usize,
}

/// The bootstrapped main thread.
#[derive(Debug)]
pub struct MainThreadTls {
    pub config: StaticTlsConfig,
    pub layout: StaticTlsLayout,
    /// The main thread's own static TLS block.
    pub block: Vec<u8>,
    pub stack_guard: usize,
    template: &'static [u8],
}

impl MainThreadTls {
    /// The image registered with the host.
    pub fn template(&self) -> &'static [u8] {
        self.template
    }
}

/// Phase 1: take over the host's thread control block. Does not allocate.
pub fn init_main_thread_early<'a>(
    guard: &BootstrapGuard,
    mut thread: HostThread<'a>,
) -> Result<EarlyInit<'a>, BootstrapError> {
    guard.claim()?;
    let id = thread.thread_id;
    thread.tcb.set(TLS_SLOT_THREAD_ID, id);
    tracing::debug!("tls: main thread early init (thread id {:#x})", id);
    Ok(EarlyInit { thread })
}

impl<'a> EarlyInit<'a> {
    /// Phase 2: publish the per-thread data and install a stack guard.
    pub fn init_main_thread_late(mut self) -> Result<LateInit<'a>, BootstrapError> {
        let data = &mut *self.thread.data as *mut BionicTls as usize;
        self.thread.tcb.set(TLS_SLOT_BIONIC_TLS, data);

        let mut buf = [0u8; WORD];
        getrandom::getrandom(&mut buf).map_err(BootstrapError::Entropy)?;
        let stack_guard = usize::from_ne_bytes(buf);
        self.thread.tcb.set(TLS_SLOT_STACK_GUARD, stack_guard);

        tracing::debug!("tls: main thread late init");
        Ok(LateInit {
            thread: self.thread,
            stack_guard,
        })
    }
}

impl<'a> LateInit<'a> {
    pub fn stack_guard(&self) -> usize {
        self.stack_guard
    }

    /// Phase 3: lay out static TLS and register it with the host.
    pub fn init_main_thread_final(
        self,
        segments: &[TlsSegment],
        host: &dyn HostRuntime,
    ) -> Result<MainThreadTls, BootstrapError> {
        let layout = StaticTlsLayout::compute(segments)?;
        let image = layout.template(segments);

        // The host keeps using the template for every thread it creates.
        let template: &'static [u8] = Box::leak(image.into_boxed_slice());

        let mut block = template.to_vec();
        let slots = self.thread.tcb.to_bytes();
        block[..slots.len()].copy_from_slice(&slots);

        let config = StaticTlsConfig {
            size: layout.size,
            tpoff: layout.tpoff,
            init_img: template.as_ptr() as *const c_void,
            tls_slot_thread_id: TLS_SLOT_THREAD_ID,
            tls_slot_bionic_tls: TLS_SLOT_BIONIC_TLS,
        };
        host.register_static_tls(&config);
        tracing::info!(
            "tls: registered static TLS ({} bytes, {} segments)",
            layout.size,
            segments.len()
        );

        Ok(MainThreadTls {
            config,
            layout,
            block,
            stack_guard: self.stack_guard,
            template,
        })
    }
}
