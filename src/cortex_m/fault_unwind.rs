//! Fault unwinding: on a forced HardFault or active configurable fault,
//! reconstruct the pre-exception register set from the stacked frame.

use super::memory::CoreMemory;
use super::registers::{Aircr, AIRCR};
use super::{read_register, write_register, RegisterId};
use crate::error::Error;

const BASIC_FRAME_WORDS: u32 = 8;
const EXTENDED_FRAME_EXTRA_WORDS: u32 = 18;
const XPSR_STKALIGN_BIT: u32 = 1 << 9;
const EXC_RETURN_SPSEL_BIT: u32 = 1 << 2;

/// Unwinds the stacked exception frame and writes the repaired register set
/// back so the user observes the pre-exception state.
///
/// `has_fpu` selects whether an extended (FPU) frame's extra 18 words are
/// accounted for; detecting whether THIS particular exception actually used
/// one is out of scope without reading `EXC_RETURN`'s bit 4, which is done
/// here via the stacked `LR`.
pub fn unwind(mem: &mut impl CoreMemory, has_fpu: bool) -> Result<(), Error> {
    let exc_return = read_register(mem, RegisterId::Lr)?;
    let used_psp = exc_return & EXC_RETURN_SPSEL_BIT != 0;
    let sp_reg = if used_psp {
        RegisterId::Psp
    } else {
        RegisterId::Msp
    };
    let frame_base = read_register(mem, sp_reg)?;

    let mut frame = [0u32; 8];
    mem.read_block_32(frame_base, &mut frame)?;
    let stacked_r0 = frame[0];
    let stacked_r1 = frame[1];
    let stacked_r2 = frame[2];
    let stacked_r3 = frame[3];
    let stacked_r12 = frame[4];
    let stacked_lr = frame[5];
    let stacked_pc = frame[6];
    let stacked_xpsr = frame[7];

    let extended = has_fpu && (exc_return & (1 << 4) == 0);
    let mut new_sp = frame_base
        + BASIC_FRAME_WORDS * 4
        + if extended {
            EXTENDED_FRAME_EXTRA_WORDS * 4
        } else {
            0
        };
    if stacked_xpsr & XPSR_STKALIGN_BIT != 0 {
        new_sp += 4;
    }

    write_register(mem, RegisterId::R(0), stacked_r0)?;
    write_register(mem, RegisterId::R(1), stacked_r1)?;
    write_register(mem, RegisterId::R(2), stacked_r2)?;
    write_register(mem, RegisterId::R(3), stacked_r3)?;
    write_register(mem, RegisterId::R(12), stacked_r12)?;
    write_register(mem, RegisterId::Lr, stacked_lr)?;
    write_register(mem, RegisterId::Pc, stacked_pc)?;
    write_register(mem, RegisterId::Xpsr, stacked_xpsr)?;
    write_register(mem, sp_reg, new_sp)?;

    // Clear the now-stale active vector so the debugger doesn't see the
    // exception as still live.
    let mut aircr = Aircr::from(0);
    aircr.set_vectclractive(true);
    mem.write_word_32(AIRCR, aircr.for_write())?;

    Ok(())
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
    fn basic_frame_advances_sp_by_32() {
        let mut mem = FakeMemory(Default::default());
        // EXC_RETURN selecting MSP, basic frame (bit4 set => not extended).
        write_register(&mut mem, RegisterId::Lr, 0xFFFF_FFF1).unwrap();
        write_register(&mut mem, RegisterId::Msp, 0x2000_0000).unwrap();
        for (i, v) in [1u32, 2, 3, 4, 5, 6, 7, 0].iter().enumerate() {
            mem.write_word_32(0x2000_0000 + (i as u32) * 4, *v).unwrap();
        }

        unwind(&mut mem, false).unwrap();

        let sp = read_register(&mut mem, RegisterId::Msp).unwrap();
        assert_eq!(sp, 0x2000_0000 + 32);
    }

    #[test]
    fn stkalign_bit_adds_4_bytes() {
        let mut mem = FakeMemory(Default::default());
        write_register(&mut mem, RegisterId::Lr, 0xFFFF_FFF1).unwrap();
        write_register(&mut mem, RegisterId::Msp, 0x2000_0000).unwrap();
        let xpsr_with_align = XPSR_STKALIGN_BIT;
        for (i, v) in [0u32, 0, 0, 0, 0, 0, 0, xpsr_with_align].iter().enumerate() {
            mem.write_word_32(0x2000_0000 + (i as u32) * 4, *v).unwrap();
        }
        unwind(&mut mem, false).unwrap();
        let sp = read_register(&mut mem, RegisterId::Msp).unwrap();
        assert_eq!(sp, 0x2000_0000 + 32 + 4);
    }
}
