/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Batch processor (component C): a pacing primitive, not a parallelism
//! primitive. Splits `items` into chunks, invokes `worker` per chunk, and
//! reports cumulative progress so a large merge doesn't monopolize the host.

use interrupt_support::Interruptee;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed_items: usize,
    pub total_items: usize,
}

pub struct BatchOptions<'a> {
    pub batch_size: usize,
    pub on_progress: Option<&'a mut dyn FnMut(Progress)>,
    pub interruptee: Option<&'a dyn Interruptee>,
}

impl Default for BatchOptions<'_> {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_progress: None,
            interruptee: None,
        }
    }
}

/// Process `items` in consecutive chunks of `opts.batch_size` (default 100),
/// calling `worker(chunk)` for each chunk and `opts.on_progress` after each
/// one completes. If `opts.interruptee` is set, interruption is checked once
/// per chunk boundary; a long merge can be abandoned between batches without
/// the engine needing to know why.
pub fn process_in_batches<T>(
    items: &[T],
    mut worker: impl FnMut(&[T]),
    mut opts: BatchOptions<'_>,
) -> Result<(), interrupt_support::Interrupted> {
    let total_items = items.len();
    let batch_size = opts.batch_size.max(1);
    let mut processed_items = 0;

    for chunk in items.chunks(batch_size) {
        if let Some(interruptee) = opts.interruptee {
            interruptee.err_if_interrupted()?;
        }
        worker(chunk);
        processed_items += chunk.len();
        if let Some(on_progress) = opts.on_progress.as_deref_mut() {
            on_progress(Progress {
                processed_items,
                total_items,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use interrupt_support::NeverInterrupts;

    #[test]
    fn test_batches_cover_all_items_and_report_progress() {
        let items: Vec<u32> = (0..250).collect();
        let mut seen = Vec::new();
        let mut progress_log = Vec::new();
        process_in_batches(
            &items,
            |chunk| seen.extend_from_slice(chunk),
            BatchOptions {
                batch_size: 100,
                on_progress: Some(&mut |p| progress_log.push(p)),
                interruptee: Some(&NeverInterrupts),
            },
        )
        .unwrap();
        assert_eq!(seen, items);
        assert_eq!(
            progress_log,
            vec![
                Progress {
                    processed_items: 100,
                    total_items: 250
                },
                Progress {
                    processed_items: 200,
                    total_items: 250
                },
                Progress {
                    processed_items: 250,
                    total_items: 250
                },
            ]
        );
    }

    #[test]
    fn test_empty_input_runs_no_batches() {
        let items: Vec<u32> = Vec::new();
        let mut calls = 0;
        process_in_batches(
            &items,
            |_| calls += 1,
            BatchOptions::default(),
        )
        .unwrap();
        assert_eq!(calls, 0);
    }

    struct AlwaysInterrupted;
    impl Interruptee for AlwaysInterrupted {
        fn was_interrupted(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_interruption_stops_before_first_chunk() {
        let items: Vec<u32> = (0..10).collect();
        let mut calls = 0;
        let result = process_in_batches(
            &items,
            |_| calls += 1,
            BatchOptions {
                batch_size: 5,
                on_progress: None,
                interruptee: Some(&AlwaysInterrupted),
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 0);
    }
}
