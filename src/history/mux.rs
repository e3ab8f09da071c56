//! Ordered merge of transaction streams
//!
//! Each source must already be ordered by the same comparator. The merge
//! keeps one buffered head per source and always emits the smallest head;
//! on ties the earlier source wins, so the merge is stable. Sources are only
//! pulled when their head has been emitted.

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::cmp::Ordering;

struct MuxState<'a, T, E, F> {
    sources: Vec<BoxStream<'a, Result<T, E>>>,
    heads: Vec<Option<T>>,
    compare: F,
    primed: bool,
    deferred_error: Option<E>,
    done: bool,
}

/// Merge `sources` into one stream ordered by `compare`.
///
/// The first error from any source is emitted after the items already
/// taken, then the merged stream ends.
pub fn mux<'a, T, E, F>(
    sources: Vec<BoxStream<'a, Result<T, E>>>,
    compare: F,
) -> BoxStream<'a, Result<T, E>>
where
    T: Send + 'a,
    E: Send + 'a,
    F: Fn(&T, &T) -> Ordering + Send + 'a,
{
    let heads = sources.iter().map(|_| None).collect();
    let state = MuxState {
        sources,
        heads,
        compare,
        primed: false,
        deferred_error: None,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        if let Some(err) = state.deferred_error.take() {
            state.done = true;
            return Some((Err(err), state));
        }
        if !state.primed {
            state.primed = true;
            for idx in 0..state.sources.len() {
                match state.sources[idx].next().await {
                    Some(Ok(item)) => state.heads[idx] = Some(item),
                    Some(Err(err)) => {
                        state.done = true;
                        return Some((Err(err), state));
                    }
                    None => {}
                }
            }
        }

        let best = state
            .heads
            .iter()
            .enumerate()
            .filter_map(|(idx, head)| head.as_ref().map(|item| (idx, item)))
            .reduce(|best, candidate| {
                if (state.compare)(candidate.1, best.1) == Ordering::Less {
                    candidate
                } else {
                    best
                }
            })
            .map(|(idx, _)| idx)?;

        let item = state.heads[best].take()?;
        match state.sources[best].next().await {
            Some(Ok(next)) => state.heads[best] = Some(next),
            Some(Err(err)) => state.deferred_error = Some(err),
            None => {}
        }
        Some((Ok(item), state))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn source(items: Vec<(i64, &'static str)>) -> BoxStream<'static, Result<(i64, &'static str), String>> {
        stream::iter(items.into_iter().map(Ok)).boxed()
    }

    fn descending(a: &(i64, &str), b: &(i64, &str)) -> Ordering {
        b.0.cmp(&a.0)
    }

    #[tokio::test]
    async fn test_merges_three_and_two_descending() {
        let merged: Vec<_> = mux(
            vec![
                source(vec![(50, "a"), (30, "a"), (10, "a")]),
                source(vec![(40, "b"), (20, "b")]),
            ],
            descending,
        )
        .try_collect()
        .await
        .unwrap();
        let dates: Vec<i64> = merged.iter().map(|(d, _)| *d).collect();
        assert_eq!(dates, vec![50, 40, 30, 20, 10]);
    }

    #[tokio::test]
    async fn test_ties_keep_source_order() {
        let merged: Vec<_> = mux(
            vec![source(vec![(10, "first")]), source(vec![(10, "second")])],
            descending,
        )
        .try_collect()
        .await
        .unwrap();
        assert_eq!(merged, vec![(10, "first"), (10, "second")]);
    }

    #[tokio::test]
    async fn test_empty_sources() {
        let merged: Vec<_> = mux(vec![source(vec![]), source(vec![(1, "x")])], descending)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(merged, vec![(1, "x")]);

        let none: Vec<(i64, &str)> = mux::<_, String, _>(Vec::new(), descending)
            .try_collect()
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_error_ends_stream_after_taken_items() {
        let failing: BoxStream<'static, Result<(i64, &'static str), String>> = stream::iter(vec![
            Ok((30, "a")),
            Err("page fetch failed".to_string()),
        ])
        .boxed();
        let results: Vec<_> = mux(vec![failing, source(vec![(20, "b")])], descending)
            .collect()
            .await;
        assert_eq!(results[0], Ok((30, "a")));
        assert_eq!(results[1], Err("page fetch failed".to_string()));
        assert_eq!(results.len(), 2);
    }
}
