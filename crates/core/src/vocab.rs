//! Attribute, connection, mapping and transform flags

use crate::flag_set;

flag_set! {
    /// Flags carried by attribute definitions and attributes
    pub struct AttrFlags: u32 {
        /// Values arrive as a sequence
        const SEQUENTIAL = 0x01;
        /// Value lives in another object
        const REMOTE = 0x02;
        /// Value cannot be set by the holder
        const READONLY = 0x04;
        /// No default value is copied in at creation
        const OPTIONAL = 0x08;
        /// Connected to a remote attribute
        const CONNECTED = 0x10;
        /// Updates are received asynchronously
        const ASYNC_RECEIVER = 0x20;
        /// Value is owned by native code
        const NATIVE = 0x40;
        /// Value may change without notice
        const VOLATILE = 0x80;
        /// Value is stale
        const NOT_CURRENT = 0x100;
        /// Value is an estimate
        const ESTIMATE = 0x200;
        /// Produced by a transform
        const OUTPUT = 0x400;
        /// Visible outside the segment that created it
        const EXTERN = 0x800;
    }
}

flag_set! {
    /// Flags on a connection between two attributes
    pub struct ConnFlags: u32 {
        /// Copy the remote value locally when disconnecting
        const COPY_ON_DISCONNECT = 1 << 0;
        /// Destroy the local attribute when disconnecting
        const DESTROY_ON_DISCONNECT = 1 << 1;
        /// Writes go through to the remote attribute
        const READ_WRITE = 1 << 2;
        /// Remote updates are pushed asynchronously
        const ASYNC_UPDATES = 1 << 3;
    }
}

flag_set! {
    /// Flags on an attribute map entry of a trajectory
    pub struct MapFlags: u32 {
        /// Read by the functional
        const IN = 0x01;
        /// Written by the functional
        const OUT = 0x02;
        /// Passed as a parameter
        const PARAM = 0x08;
        /// Kept after the segment ends
        const EXTERN = 0x10;
        /// Need not be present
        const OPT = 0x20;
        /// Output array size is computed before the main call
        const PRE_CALC_SIZE = 0x100;
    }
}

impl MapFlags {
    /// Pure input: read but never written
    pub fn is_pure_input(self) -> bool {
        self.contains(MapFlags::IN) && !self.contains(MapFlags::OUT)
    }
}

flag_set! {
    /// Flags on a contract and the transforms it produces
    pub struct TxFlags: u32 {
        /// Skip capacity negotiation
        const NO_NEGOTIATE = 1 << 0;
        /// Run on the pool instead of inline
        const QUEUED = 1 << 1;
        /// Several instances may run concurrently
        const THREADSAFE = 1 << 2;
        /// Segments may run in parallel
        const PARALLEL = 1 << 3;
        /// Expensive to run
        const COSTLY = 1 << 4;
        /// Known not to work
        const BROKEN = 1 << 5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_flag_values() {
        assert_eq!(AttrFlags::EXTERN.bits(), 0x800);
        assert!((AttrFlags::READONLY | AttrFlags::OPTIONAL).contains(AttrFlags::OPTIONAL));
    }

    #[test]
    fn test_pure_input() {
        assert!(MapFlags::IN.is_pure_input());
        assert!(!(MapFlags::IN | MapFlags::OUT).is_pure_input());
        assert!(!MapFlags::OUT.is_pure_input());
    }
}
