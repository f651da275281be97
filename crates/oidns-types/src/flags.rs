use bitflags::bitflags;

bitflags! {
    /// Per-node state bits, guarded by the node's exclusive lock.
    ///
    /// The `*_CHILD` and `*_SINGULARITY` bits are set on a parent for the
    /// duration of one structural change made through the object-id API; the
    /// backing store refuses to touch canonical aliases unless the matching
    /// bit is present.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StateFlags: u32 {
        const CREATING_CHILD = 1 << 0;
        const REMOVING_CHILD = 1 << 1;
        const CREATING_SINGULARITY = 1 << 2;
        const REMOVING_SINGULARITY = 1 << 3;
        const LINKING_CHILD = 1 << 4;
        const RENAMING_CHILD = 1 << 5;
        const SINGULARITY = 1 << 6;
        const INDEXED = 1 << 7;

        /// Any of the transient in-progress bits.
        const IN_PROGRESS = Self::CREATING_CHILD.bits()
            | Self::REMOVING_CHILD.bits()
            | Self::CREATING_SINGULARITY.bits()
            | Self::REMOVING_SINGULARITY.bits()
            | Self::LINKING_CHILD.bits()
            | Self::RENAMING_CHILD.bits();
    }
}

bitflags! {
    /// Rename modifiers.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RenameFlags: u32 {
        /// Fail if the destination name exists.
        const NOREPLACE = 1 << 0;
        /// Atomically swap source and destination; both must exist.
        const EXCHANGE = 1 << 1;
        /// Leave a whiteout behind. Not supported by this namespace.
        const WHITEOUT = 1 << 2;
    }
}

impl RenameFlags {
    /// Whether this combination can be honored.
    pub fn is_supported(self) -> bool {
        (self - (Self::NOREPLACE | Self::EXCHANGE)).is_empty()
            && !self.contains(Self::NOREPLACE | Self::EXCHANGE)
    }
}
