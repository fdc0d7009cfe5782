//! Spill-range output protocol.
//!
//! When a cell evaluates to a `SpillOutput` of width W and height H, the
//! producer expands over its W×H neighbourhood by writing synthetic stub
//! cells whose code resolves the corresponding slot through the `OFFSET`
//! accessor. A neighbour holding any other non-empty text blocks the
//! expansion and the producer's value becomes a spill-conflict error.
//!
//! Stubs are lazy in the other direction: when a stub is read and its
//! producer no longer spills far enough, the stub erases itself (see the
//! `OFFSET` accessor) and reads as Empty.

use cellscript_engine::engine::{CellKey, ExpressionMode, SpillValue};

use super::state::Shared;

/// Synthetic raw text written into a spilled neighbour, phrased in the
/// workbook's current expression mode so it parses as code.
pub(crate) fn stub_text(mode: ExpressionMode, anchor_label: &str, dr: u32, dc: u32) -> String {
    let call = format!("OFFSET(\"{}\", {}, {})", anchor_label, dr, dc);
    match mode {
        ExpressionMode::ReverseMixed => format!(">{}", call),
        ExpressionMode::PureSpreadsheet => format!("={}", call),
        ExpressionMode::PureScript | ExpressionMode::Mixed => call,
    }
}

/// Expand `spill` produced at `anchor` over its neighbourhood. Returns the
/// conflict description if a neighbour blocks the expansion; no stub is
/// written in that case.
pub(crate) fn expand(shared: &Shared, anchor: CellKey, spill: &SpillValue) -> Result<(), String> {
    let width = spill.width;
    let height = spill.height;
    if width == 0 || height == 0 {
        return Ok(());
    }

    if anchor.row as u64 + height as u64 > shared.shape.rows as u64
        || anchor.col as u64 + width as u64 > shared.shape.cols as u64
    {
        return Err(format!(
            "spill of {}x{} from {} extends outside the grid",
            height,
            width,
            anchor.label()
        ));
    }

    let anchor_label = anchor.label();
    let mode = shared.mode();

    // First pass: every neighbour must be empty or already our own stub.
    for dr in 0..height {
        for dc in 0..width {
            if dr == 0 && dc == 0 {
                continue;
            }
            let neighbour = CellKey::new(anchor.row + dr, anchor.col + dc, anchor.sheet);
            let occupied = shared
                .store
                .get(&neighbour)
                .map(|entry| entry.value().clone())
                .filter(|text| !text.is_empty());
            if let Some(text) = occupied {
                let ours = text == stub_text(mode, &anchor_label, dr, dc)
                    || shared
                        .recalc
                        .lock()
                        .expect("recalc lock poisoned")
                        .spill_anchors
                        .get(&neighbour)
                        == Some(&anchor);
                if !ours {
                    return Err(format!(
                        "cannot spill from {}: cell {} is occupied",
                        anchor_label,
                        neighbour.label()
                    ));
                }
            }
        }
    }

    // Second pass: write the stubs.
    for dr in 0..height {
        for dc in 0..width {
            if dr == 0 && dc == 0 {
                continue;
            }
            let neighbour = CellKey::new(anchor.row + dr, anchor.col + dc, anchor.sheet);
            let stub = stub_text(mode, &anchor_label, dr, dc);
            let unchanged = shared
                .store
                .get(&neighbour)
                .map(|entry| *entry.value() == stub)
                .unwrap_or(false);
            if !unchanged {
                shared.store.insert(neighbour, stub);
                let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
                rc.graph.remove_cell(neighbour, false);
                rc.graph.mark_dirty(neighbour);
            }
            shared
                .recalc
                .lock()
                .expect("recalc lock poisoned")
                .spill_anchors
                .insert(neighbour, anchor);
        }
    }

    Ok(())
}
