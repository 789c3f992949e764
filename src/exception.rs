//! Scoped error-exit helpers standing in for the source's `exception`
//! facility: every ADI-touching region runs inside `with_dp`, which clears
//! the sticky DP error on any exit path instead of unwinding via longjmp.

use crate::arm::{AdiV5, ArmError, DpHandle};
use crate::link::Link;

/// Runs `body` against `iface`/`dp`; on `Err`, clears the sticky DP error
/// before propagating so a caught fault never leaves the DP silently faulted.
pub fn with_dp<L: Link, T>(
    iface: &mut AdiV5<L>,
    dp: DpHandle,
    body: impl FnOnce(&mut AdiV5<L>) -> Result<T, ArmError>,
) -> Result<T, ArmError> {
    match body(iface) {
        Ok(value) => Ok(value),
        Err(err) => {
            let _ = iface.error(dp);
            Err(err)
        }
    }
}

/// Like [`with_dp`] but for a single AP index, for call sites that only
/// need the `apsel`-scoped variant (`try_ap` in the design note).
pub fn try_ap<L: Link, T>(
    iface: &mut AdiV5<L>,
    dp: DpHandle,
    _ap_index: usize,
    body: impl FnOnce(&mut AdiV5<L>) -> Result<T, ArmError>,
) -> Result<T, ArmError> {
    with_dp(iface, dp, body)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm::dp::DebugPortVersion;
    use crate::link::{Link, LinkError};

    struct NullLink;
    impl Link for NullLink {
        fn reset_link(&mut self) -> Result<(), LinkError> {
            Ok(())
        }
        fn seq_in(&mut self, _n: u32) -> u64 {
            0
        }
        fn seq_in_parity(&mut self, _n: u32) -> (u64, bool) {
            (0, true)
        }
        fn seq_out(&mut self, _value: u64, _n: u32) {}
        fn seq_out_parity(&mut self, _value: u64, _n: u32) {}
    }

    #[test]
    fn clears_sticky_on_error_exit() {
        let mut iface = AdiV5::new(NullLink);
        let dp = iface.dps.insert(DebugPortVersion::DPv1);
        if let Some(d) = iface.dps.get_mut(dp) {
            d.sticky_fault = true;
        }
        let result: Result<(), ArmError> = with_dp(&mut iface, dp, |_iface| Err(ArmError::ApFault));
        assert!(result.is_err());
        assert!(!iface.dps.get(dp).unwrap().sticky_fault);
    }
}
