//! Window-size reconciliation: the per-dimension minimum across all
//! attached clients' declared geometries, or the fixed 80x24 fallback.
//!
//! Grounded on the source's inline `curr_ws`/`wss[]` scan in `server()`,
//! pulled out into a standalone pure function so it can be tested without a
//! PTY or sockets.

pub const FALLBACK_COLS: u16 = 80;
pub const FALLBACK_ROWS: u16 = 24;

/// Computes the reconciled (columns, rows) for the given set of per-client
/// geometries.
pub fn reconcile(geometries: &[(u16, u16)]) -> (u16, u16) {
    let cols = geometries.iter().map(|(c, _)| *c).min();
    let rows = geometries.iter().map(|(_, r)| *r).min();
    match (cols, rows) {
        (Some(c), Some(r)) => (c, r),
        _ => (FALLBACK_COLS, FALLBACK_ROWS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_80x24_with_no_clients() {
        assert_eq!(reconcile(&[]), (80, 24));
    }

    #[test]
    fn single_client_adopts_its_own_geometry() {
        assert_eq!(reconcile(&[(120, 40)]), (120, 40));
    }

    #[test]
    fn takes_per_dimension_minimum_across_clients() {
        assert_eq!(reconcile(&[(100, 40), (80, 50)]), (80, 40));
    }

    #[test]
    fn dropping_the_constraining_client_relaxes_the_minimum() {
        let all = [(100, 40), (80, 50)];
        assert_eq!(reconcile(&all), (80, 40));
        let after_drop = [all[0]];
        assert_eq!(reconcile(&after_drop), (100, 40));
    }
}
