//! Data Watchpoint and Trace (DWT) unit: hardware watchpoint comparators.

use super::breakpoints::BreakwatchKind;
use super::memory::CoreMemory;
use super::registers::DWT_BASE;
use crate::error::Error;

const DWT_CTRL: u32 = DWT_BASE;
const DWT_COMP0: u32 = DWT_BASE + 0x20;
const DWT_FUNC0: u32 = DWT_BASE + 0x28;
const DWT_STRIDE: u32 = 0x10;

/// Watch size, encoded as a mask length: 0 => 1 byte, 1 => 2 bytes, 2 => 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSize {
    Byte,
    Halfword,
    Word,
}

impl WatchSize {
    fn mask(self) -> u32 {
        match self {
            WatchSize::Byte => 0,
            WatchSize::Halfword => 1,
            WatchSize::Word => 2,
        }
    }
}

/// Architecture variant, since V6M and V7M encode `DWT_FUNCn.FUNCTION`
/// differently for the same access direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchVariant {
    V6M,
    V7M,
}

fn function_code(kind: BreakwatchKind, variant: ArchVariant) -> u32 {
    match (variant, kind) {
        (ArchVariant::V7M, BreakwatchKind::WatchRead) => 0b0101,
        (ArchVariant::V7M, BreakwatchKind::WatchWrite) => 0b0110,
        (ArchVariant::V7M, BreakwatchKind::WatchAccess) => 0b0111,
        (ArchVariant::V6M, BreakwatchKind::WatchRead) => 0b0110,
        (ArchVariant::V6M, BreakwatchKind::WatchWrite) => 0b0101,
        (ArchVariant::V6M, BreakwatchKind::WatchAccess) => 0b0100,
        (_, BreakwatchKind::Hard) => 0,
    }
}

/// The DWT comparator pool for one core.
#[derive(Debug, Default)]
pub struct DwtUnit {
    pub num_comparators: usize,
    occupied: Vec<bool>,
}

impl DwtUnit {
    /// Reads `DWT_CTRL.NUMCOMP` to size the comparator pool.
    pub fn size(&mut self, mem: &mut impl CoreMemory) -> Result<(), Error> {
        let ctrl = mem.read_word_32(DWT_CTRL)?;
        let num = ((ctrl >> 28) & 0xF) as usize;
        self.num_comparators = num;
        self.occupied = vec![false; num];
        Ok(())
    }

    fn alloc(&mut self) -> Result<usize, Error> {
        self.occupied
            .iter()
            .position(|&used| !used)
            .map(|slot| {
                self.occupied[slot] = true;
                slot
            })
            .ok_or(Error::NoResources)
    }

    /// Allocates a comparator, programs it for the given address/size/kind.
    pub fn set(
        &mut self,
        mem: &mut impl CoreMemory,
        address: u32,
        size: WatchSize,
        kind: BreakwatchKind,
        variant: ArchVariant,
    ) -> Result<usize, Error> {
        let slot = self.alloc()?;
        mem.write_word_32(DWT_COMP0 + (slot as u32) * DWT_STRIDE, address)?;
        let mask = size.mask();
        let func = function_code(kind, variant);
        let value = (mask << 8) | func;
        mem.write_word_32(DWT_FUNC0 + (slot as u32) * DWT_STRIDE, value)?;
        Ok(slot)
    }

    /// Clears one comparator.
    pub fn clear(&mut self, mem: &mut impl CoreMemory, slot: usize) -> Result<(), Error> {
        mem.write_word_32(DWT_FUNC0 + (slot as u32) * DWT_STRIDE, 0)?;
        if let Some(used) = self.occupied.get_mut(slot) {
            *used = false;
        }
        Ok(())
    }

    /// Clears every comparator (used on detach).
    pub fn clear_all(&mut self, mem: &mut impl CoreMemory) -> Result<(), Error> {
        for slot in 0..self.num_comparators {
            mem.write_word_32(DWT_FUNC0 + (slot as u32) * DWT_STRIDE, 0)?;
        }
        self.occupied.iter_mut().for_each(|used| *used = false);
        Ok(())
    }

    /// Finds the comparator whose `MATCHED` bit is set, by reading every
    /// `DWT_FUNCn` on each halt, as the spec requires.
    pub fn matched_comparator(&self, mem: &mut impl CoreMemory) -> Result<Option<usize>, Error> {
        for slot in 0..self.num_comparators {
            let func = mem.read_word_32(DWT_FUNC0 + (slot as u32) * DWT_STRIDE)?;
            if func & (1 << 24) != 0 {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct FakeMemory(std::collections::HashMap<u32, u32>);
    impl CoreMemory for FakeMemory {
        fn read_word_32(&mut self, addr: u32) -> Result<u32, Error> {
            Ok(*self.0.get(&addr).unwrap_or(&0))
        }
        fn write_word_32(&mut self, addr: u32, value: u32) -> Result<(), Error> {
            self.0.insert(addr, value);
            Ok(())
        }
    }

    #[test]
    fn matched_comparator_finds_set_bit() {
        let mut mem = FakeMemory(Default::default());
        mem.0.insert(DWT_CTRL, 2 << 28);
        let mut dwt = DwtUnit::default();
        dwt.size(&mut mem).unwrap();
        dwt.set(
            &mut mem,
            0x2000_0000,
            WatchSize::Word,
            BreakwatchKind::WatchWrite,
            ArchVariant::V7M,
        )
        .unwrap();
        // Simulate the comparator matching.
        mem.0.insert(DWT_FUNC0, (1 << 24) | 0b0110);
        assert_eq!(dwt.matched_comparator(&mut mem).unwrap(), Some(0));
    }

    #[test]
    fn v6m_and_v7m_encode_read_write_oppositely() {
        assert_ne!(
            function_code(BreakwatchKind::WatchRead, ArchVariant::V6M),
            function_code(BreakwatchKind::WatchRead, ArchVariant::V7M)
        );
    }
}
