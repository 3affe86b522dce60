use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::dissect::{DissectorRegistry, Priority};
use crate::engine::CandidateFinding;
use crate::engine::extraction::ExtractionDescriptor;
use crate::region::ByteRegion;

fn is_groupable(registry: &DissectorRegistry, index: usize) -> bool {
    registry
        .get(index)
        .is_some_and(|d| d.should_group_in_one_file())
}

/// Keep the best non-overlapping subset of non-groupable candidates.
/// Groupable candidates never block each other; one is dropped only when it
/// overlaps an accepted finding that outranks it (higher priority, or equal
/// priority and earlier registration). Output is ordered by start offset.
pub fn resolve_overlaps(
    candidates: Vec<CandidateFinding>,
    registry: &DissectorRegistry,
) -> Vec<CandidateFinding> {
    let (grouped, mut exclusive): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| is_groupable(registry, c.dissector));

    exclusive.sort_by_key(|c| {
        (
            Reverse(c.finding.priority),
            c.dissector,
            c.finding.region.start,
            Reverse(c.finding.region.end),
        )
    });

    // start -> (end, rank) of accepted, pairwise disjoint regions
    let mut taken: BTreeMap<u64, (u64, Rank)> = BTreeMap::new();
    let mut accepted = Vec::new();
    for candidate in exclusive {
        let region = candidate.finding.region;
        let blocked = taken
            .range(..region.end)
            .next_back()
            .is_some_and(|(_, (end, _))| *end > region.start);
        if blocked {
            continue;
        }
        taken.insert(region.start, (region.end, rank(&candidate)));
        accepted.push(candidate);
    }

    for candidate in grouped {
        let region = candidate.finding.region;
        let own = rank(&candidate);
        // Disjoint regions sorted by start also have ascending ends, so the
        // overlapping ones form a contiguous tail of this range.
        let outranked = taken
            .range(..region.end)
            .rev()
            .take_while(|(_, (end, _))| *end > region.start)
            .any(|(_, (_, other))| *other < own);
        if !outranked {
            accepted.push(candidate);
        }
    }

    accepted.sort_by_key(|c| (c.finding.region.start, c.dissector, c.finding.region.end));
    accepted
}

/// Smaller wins: higher priority first, then earlier registration.
type Rank = (Reverse<Priority>, usize);

fn rank(candidate: &CandidateFinding) -> Rank {
    (Reverse(candidate.finding.priority), candidate.dissector)
}

/// One descriptor per non-groupable finding, one per groupable dissector.
pub fn group_findings(
    accepted: &[CandidateFinding],
    registry: &DissectorRegistry,
) -> Vec<ExtractionDescriptor> {
    let mut groups: BTreeMap<usize, Vec<ByteRegion>> = BTreeMap::new();
    let mut descriptors = Vec::new();

    for candidate in accepted {
        let Some(dissector) = registry.get(candidate.dissector) else {
            continue;
        };
        if dissector.should_group_in_one_file() {
            groups
                .entry(candidate.dissector)
                .or_default()
                .push(candidate.finding.region);
        } else {
            descriptors.push(ExtractionDescriptor::single(
                &dissector.descriptor(),
                candidate.dissector,
                candidate.finding.region,
            ));
        }
    }

    for (index, mut regions) in groups {
        let Some(dissector) = registry.get(index) else {
            continue;
        };
        regions.sort();
        descriptors.push(ExtractionDescriptor::grouped(
            &dissector.descriptor(),
            index,
            regions,
        ));
    }

    descriptors.sort_by_key(|d| (d.first_offset(), d.dissector_index));
    descriptors
}
