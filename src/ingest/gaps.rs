//! Gap detection over persisted block heights.
//!
//! Compares the heights present in the store against the contiguous range `0..=lastIndexedBlock`
//! claimed by the progress record. The check is advisory: it reports missing ranges (typically
//! heights skipped because their state was pruned) but never changes where a run starts.

use crate::store::{IndexStore, StoreError};

use std::fmt;
use tracing::{debug, warn};

/// An inclusive range of missing heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRange {
	pub start: u64,
	pub end: u64,
}

impl GapRange {
	/// Number of missing heights, never zero.
	#[allow(clippy::len_without_is_empty)]
	pub fn len(&self) -> u64 {
		self.end - self.start + 1
	}
}

impl fmt::Display for GapRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.start == self.end {
			write!(f, "[{}]", self.start)
		} else {
			write!(f, "[{}, {}]", self.start, self.end)
		}
	}
}

/// Missing ranges in `heights` (ascending) below `last_indexed`.
///
/// Nothing is reported when there is no checkpoint or it sits at height 0.
pub fn find_gaps(heights: &[u64], last_indexed: Option<u64>) -> Vec<GapRange> {
	let last_indexed = match last_indexed {
		Some(height) if height > 0 => height,
		_ => return Vec::new(),
	};

	let mut gaps = Vec::new();
	let mut expected = 0u64;
	for &height in heights {
		if height > expected {
			gaps.push(GapRange {
				start: expected,
				end: height - 1,
			});
		}
		expected = expected.max(height + 1);
	}

	if expected <= last_indexed {
		gaps.push(GapRange {
			start: expected,
			end: last_indexed,
		});
	}

	gaps
}

/// Read the persisted heights and progress of `chain_id` and report missing ranges.
pub async fn detect_gaps<S>(store: &S, chain_id: &str) -> Result<Vec<GapRange>, StoreError>
where
	S: IndexStore + ?Sized,
{
	let Some(progress) = store.load_progress(chain_id).await? else {
		debug!("No progress recorded for {}, skipping gap check", chain_id);
		return Ok(Vec::new());
	};

	let heights = store.block_heights(chain_id).await?;
	let gaps = find_gaps(&heights, progress.last_indexed_block);

	for gap in &gaps {
		warn!(
			"Gap detected for {}: {} missing heights {}",
			chain_id,
			gap.len(),
			gap
		);
	}

	Ok(gaps)
}
