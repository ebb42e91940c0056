use bitflags::bitflags;

bitflags! {
    /// Side effects a node carries into the commit phase.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        const PLACEMENT = 1 << 1;
        const UPDATE = 1 << 2;
        const CHILD_DELETION = 1 << 3;
        const REF = 1 << 4;
        const PASSIVE_EFFECT = 1 << 5;

        const MUTATION_MASK = Self::PLACEMENT.bits() | Self::UPDATE.bits() | Self::CHILD_DELETION.bits();
        const LAYOUT_MASK = Self::REF.bits();
    }
}

bitflags! {
    /// Tag stored on each effect record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectTag: u8 {
        const PASSIVE = 1 << 0;
        /// Set when the effect has to fire during the next passive flush.
        const HAS_EFFECT = 1 << 1;
    }
}
