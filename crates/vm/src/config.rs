/// Tunables of a [`Vm`](crate::Vm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    /// Call depth limit. Calling past it is a `Stack overflow.` error.
    pub max_frames: usize,
    /// Bytes allocated before the first collection
    pub initial_gc_threshold: usize,
    /// After a collection the next one happens once the live heap has grown
    /// by this factor
    pub gc_grow_factor: usize,
    /// Collect before every allocation. Slow; shakes out missing roots.
    pub stress_gc: bool,
    /// Run the core prelude, which defines `filter` and `map`, when the VM
    /// is created
    pub load_prelude: bool,
}

/// Initial GC threshold. 1MiB.
pub const INIT_GC_THRESHOLD: usize = 1024 * 1024;

/// Stack slots reserved per call frame
pub const SLOTS_PER_FRAME: usize = 256;

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            max_frames: 64,
            initial_gc_threshold: INIT_GC_THRESHOLD,
            gc_grow_factor: 2,
            stress_gc: false,
            load_prelude: true,
        }
    }
}
