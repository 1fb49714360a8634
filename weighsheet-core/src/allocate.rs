//! Net weight allocation from packing parts to invoice lines.
//!
//! Packing weights are aggregated per part, rounded at the smallest
//! precision that reproduces the stated total, and then spread over the
//! invoice lines of each part in proportion to quantity. Every remainder
//! lands on the last item of its group, so all sums are exact.

use crate::error::{ErrorCode, ErrorContext, ProcessingError, ProcessingResult};
use crate::extract::{InvoiceLine, PackingLine};
use crate::numeric::{WEIGHT_PRECISION_MAX, clamp_weight_precision, round_half_up};
use crate::totals::PackingTotals;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

/// Largest accepted gap between the packing lines and the stated total
fn aggregate_tolerance() -> Decimal {
    Decimal::new(1, 1)
}

#[derive(Debug, Clone, Copy, Default)]
struct PartAggregate {
    net_weight: Decimal,
    quantity: Decimal,
}

/// Outcome of a successful allocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    /// Decimals used for per-part weights
    pub packing_precision: u32,
    /// Decimals used for per-line weights
    pub line_precision: u32,
    /// Rounded weight of every part, in packing order
    pub part_weights: IndexMap<String, Decimal>,
}

/// Allocate `totals.total_net_weight` over the invoice lines.
///
/// Fills `allocated_weight` on every invoice line. On success the allocated
/// weights sum exactly to the stated total.
pub fn allocate_weights(
    invoice_lines: &mut [InvoiceLine],
    packing_lines: &[PackingLine],
    totals: &PackingTotals,
) -> ProcessingResult<Allocation> {
    let total = totals.total_net_weight;
    let base_precision = clamp_weight_precision(totals.total_net_weight_precision);

    let parts = aggregate_parts(packing_lines)?;
    check_packing_sum(&parts, total)?;
    let packing_precision = determine_precision(&parts, total, base_precision)?;
    let part_weights = round_with_remainder(&parts, packing_precision, total)?;
    let line_precision = packing_precision + 1;
    distribute(invoice_lines, &part_weights, line_precision)?;

    let allocated: Decimal = invoice_lines
        .iter()
        .filter_map(|line| line.allocated_weight)
        .sum();
    if allocated != total {
        return Err(ProcessingError::new(
            ErrorCode::AllocationSumMismatch,
            format!(
                "Final weight validation failed: allocated sum {} != total_nw {}",
                allocated, total
            ),
            ErrorContext::default()
                .detail("allocated_sum", allocated)
                .detail("total_nw", total),
        ));
    }

    info!(
        "Weight allocation complete: {} over {} lines (precision {})",
        total,
        invoice_lines.len(),
        packing_precision
    );
    Ok(Allocation {
        packing_precision,
        line_precision,
        part_weights,
    })
}

/// Sum weight and quantity per trimmed part number, keeping first-seen order
fn aggregate_parts(packing_lines: &[PackingLine]) -> ProcessingResult<IndexMap<String, PartAggregate>> {
    let mut parts: IndexMap<String, PartAggregate> = IndexMap::new();
    for line in packing_lines {
        let entry = parts.entry(line.part_number.trim().to_string()).or_default();
        entry.net_weight += line.net_weight;
        entry.quantity += line.quantity;
    }

    let zero_weight: Vec<&str> = parts
        .iter()
        .filter(|(_, agg)| agg.net_weight.is_zero())
        .map(|(part, _)| part.as_str())
        .collect();
    if !zero_weight.is_empty() {
        return Err(ProcessingError::new(
            ErrorCode::ZeroPartWeight,
            format!("Aggregated NW is zero for part_no(s): {}", zero_weight.join(", ")),
            ErrorContext::default().parts(zero_weight.iter().copied()),
        ));
    }

    let zero_qty: Vec<&str> = parts
        .iter()
        .filter(|(_, agg)| agg.quantity.is_zero())
        .map(|(part, _)| part.as_str())
        .collect();
    if !zero_qty.is_empty() {
        return Err(ProcessingError::new(
            ErrorCode::ZeroPartQuantity,
            format!("Total qty is zero for part_no(s): {}", zero_qty.join(", ")),
            ErrorContext::default().parts(zero_qty.iter().copied()),
        ));
    }

    debug!("Aggregated {} part(s) from {} packing lines", parts.len(), packing_lines.len());
    Ok(parts)
}

fn check_packing_sum(parts: &IndexMap<String, PartAggregate>, total: Decimal) -> ProcessingResult<()> {
    let packing_sum: Decimal = parts.values().map(|agg| agg.net_weight).sum();
    let diff = (packing_sum - total).abs();
    if diff > aggregate_tolerance() {
        return Err(ProcessingError::new(
            ErrorCode::PackingTotalMismatch,
            format!(
                "Aggregated packing sum {} differs from total_nw {} by {} (threshold: {})",
                packing_sum,
                total,
                diff,
                aggregate_tolerance()
            ),
            ErrorContext::default()
                .detail("packing_sum", packing_sum)
                .detail("total_nw", total)
                .detail("difference", diff),
        ));
    }
    Ok(())
}

fn rounded_sum(parts: &IndexMap<String, PartAggregate>, precision: u32) -> Decimal {
    parts
        .values()
        .map(|agg| round_half_up(agg.net_weight, precision))
        .sum()
}

/// Pick the packing precision.
///
/// The base precision is used when its rounded sum equals the total,
/// otherwise one more decimal (capped at 5) whether or not it matches.
/// The result is then raised until no part rounds to zero.
fn determine_precision(
    parts: &IndexMap<String, PartAggregate>,
    total: Decimal,
    base_precision: u32,
) -> ProcessingResult<u32> {
    let next = (base_precision + 1).min(WEIGHT_PRECISION_MAX);
    let precision = [base_precision, next]
        .into_iter()
        .find(|&p| {
            let sum = rounded_sum(parts, p);
            info!("Trying precision {}: rounded part sum {}, target {}", p, sum, total);
            sum == total
        })
        .unwrap_or(next);

    let no_zero_parts = |p: u32| {
        parts
            .values()
            .all(|agg| !round_half_up(agg.net_weight, p).is_zero())
    };
    match (precision..=WEIGHT_PRECISION_MAX).find(|&p| no_zero_parts(p)) {
        Some(p) => {
            if p > precision {
                info!("Precision raised to {} so no part weight rounds to zero", p);
            }
            Ok(p)
        }
        None => {
            let zero_parts: Vec<&str> = parts
                .iter()
                .filter(|(_, agg)| round_half_up(agg.net_weight, WEIGHT_PRECISION_MAX).is_zero())
                .map(|(part, _)| part.as_str())
                .collect();
            Err(ProcessingError::new(
                ErrorCode::WeightRoundsToZero,
                format!(
                    "Weight rounds to zero at max precision {} for part_no(s): {}",
                    WEIGHT_PRECISION_MAX,
                    zero_parts.join(", ")
                ),
                ErrorContext::default()
                    .parts(zero_parts.iter().copied())
                    .detail("precision", WEIGHT_PRECISION_MAX),
            ))
        }
    }
}

/// Round every part and put the remainder on the last one
fn round_with_remainder(
    parts: &IndexMap<String, PartAggregate>,
    precision: u32,
    total: Decimal,
) -> ProcessingResult<IndexMap<String, Decimal>> {
    let mut rounded: IndexMap<String, Decimal> = parts
        .iter()
        .map(|(part, agg)| (part.clone(), round_half_up(agg.net_weight, precision)))
        .collect();

    let remainder = total - rounded.values().copied().sum::<Decimal>();
    if !remainder.is_zero() {
        if let Some((part, weight)) = rounded.last_mut() {
            debug!("Remainder {} added to part {}", remainder, part);
            *weight += remainder;
        }
    }

    let final_sum: Decimal = rounded.values().copied().sum();
    if final_sum != total {
        return Err(ProcessingError::new(
            ErrorCode::RemainderMismatch,
            format!(
                "Weight allocation mismatch after remainder correction: sum={}, total_nw={}",
                final_sum, total
            ),
            ErrorContext::default()
                .detail("sum", final_sum)
                .detail("total_nw", total),
        ));
    }
    Ok(rounded)
}

/// Spread each part weight over its invoice lines by quantity share
fn distribute(
    invoice_lines: &mut [InvoiceLine],
    part_weights: &IndexMap<String, Decimal>,
    line_precision: u32,
) -> ProcessingResult<()> {
    let mut line_groups: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (idx, line) in invoice_lines.iter().enumerate() {
        line_groups
            .entry(line.part_number.trim().to_string())
            .or_default()
            .push(idx);
    }

    let missing_in_packing: Vec<&str> = line_groups
        .keys()
        .filter(|part| !part_weights.contains_key(*part))
        .map(String::as_str)
        .collect();
    if !missing_in_packing.is_empty() {
        return Err(ProcessingError::new(
            ErrorCode::PartMissingFromPacking,
            format!(
                "Invoice part_no(s) not found in packing: {}",
                missing_in_packing.join(", ")
            ),
            ErrorContext::default().parts(missing_in_packing.iter().copied()),
        ));
    }

    let missing_in_invoice: Vec<&str> = part_weights
        .keys()
        .filter(|part| !line_groups.contains_key(*part))
        .map(String::as_str)
        .collect();
    if !missing_in_invoice.is_empty() {
        return Err(ProcessingError::new(
            ErrorCode::PartMissingFromInvoice,
            format!(
                "Packing part_no(s) not found in invoice: {}",
                missing_in_invoice.join(", ")
            ),
            ErrorContext::default().parts(missing_in_invoice.iter().copied()),
        ));
    }

    for (part, &part_weight) in part_weights {
        let indices = &line_groups[part];
        let total_qty: Decimal = indices.iter().map(|&i| invoice_lines[i].quantity).sum();

        let Some((&last, leading)) = indices.split_last() else {
            continue;
        };
        let mut allocated = Decimal::ZERO;
        for &idx in leading {
            let share = invoice_lines[idx]
                .quantity
                .checked_div(total_qty)
                .ok_or_else(|| {
                    ProcessingError::new(
                        ErrorCode::ZeroPartQuantity,
                        format!("Total invoice qty is zero for part_no '{}'", part),
                        ErrorContext::default().part(part.as_str()),
                    )
                })?;
            let weight = round_half_up(part_weight * share, line_precision);
            invoice_lines[idx].allocated_weight = Some(weight);
            allocated += weight;
        }
        invoice_lines[last].allocated_weight = Some(part_weight - allocated);
        debug!("Part {} ({}) spread over {} line(s)", part, part_weight, indices.len());
    }
    Ok(())
}
