//! The shared prefix/delimiter collapse.
//!
//! ListObjectsV1, ListObjectsV2, and their kin all paginate the same way:
//! walk keys in strict lexicographic order, fold keys that share a
//! delimiter-bounded group into a single common prefix, and stop after
//! `max_keys` emissions. Both metadata engines feed this one
//! implementation through a row-fetching closure so their pagination
//! semantics cannot drift apart.

/// Listing parameters after query-string validation.
pub struct ListParams<'a> {
    pub prefix: &'a str,
    pub delimiter: &'a str,
    pub max_keys: u32,
    /// Start-after entry: a key, or a common prefix emitted by an earlier
    /// page. Empty means start from the beginning.
    pub cursor: &'a str,
}

/// Output of the collapse: records and common prefixes, each already in
/// lexicographic order, plus the continuation state.
pub struct Collapsed<T> {
    pub records: Vec<T>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// The last emitted entry, set only when truncated.
    pub next_cursor: Option<String>,
}

/// How many rows to pull from the engine per round trip.
const FETCH_BATCH: usize = 512;

/// Run the collapse.
///
/// `fetch(after, limit)` must return up to `limit` rows `(key, record)`
/// with `key > after` and `key >= prefix`, in ascending key order. The
/// collapse stops at the first key that no longer starts with the prefix
/// (for keys `>= prefix` that is the end of the matching range).
pub fn collapse<T, E, F>(params: &ListParams<'_>, mut fetch: F) -> Result<Collapsed<T>, E>
where
    F: FnMut(&str, usize) -> Result<Vec<(String, T)>, E>,
{
    let max = params.max_keys as usize;
    let mut out = Collapsed {
        records: Vec::new(),
        common_prefixes: Vec::new(),
        is_truncated: false,
        next_cursor: None,
    };
    if max == 0 {
        return Ok(out);
    }

    let mut emitted = 0usize;
    let mut last_emission: Option<String> = None;
    let mut after = params.cursor.to_string();

    'scan: loop {
        let batch = fetch(&after, FETCH_BATCH)?;
        let fetched = batch.len();

        for (key, record) in batch {
            after = key.clone();
            if !key.starts_with(params.prefix) {
                break 'scan;
            }

            // A key collapses into a group when the remainder past the
            // prefix still contains the delimiter.
            let group = if params.delimiter.is_empty() {
                None
            } else {
                key[params.prefix.len()..]
                    .find(params.delimiter)
                    .map(|pos| {
                        let end = params.prefix.len() + pos + params.delimiter.len();
                        key[..end].to_string()
                    })
            };
            let emission = group.clone().unwrap_or_else(|| key.clone());

            // A group emitted on an earlier page sorts at or below the
            // cursor; its remaining members must not re-emit it.
            if !params.cursor.is_empty() && emission.as_str() <= params.cursor {
                continue;
            }
            // Groups are contiguous in sorted order: a repeat of the last
            // emission is another member of the same group.
            if last_emission.as_deref() == Some(emission.as_str()) {
                continue;
            }

            if emitted == max {
                out.is_truncated = true;
                out.next_cursor = last_emission;
                break 'scan;
            }

            emitted += 1;
            last_emission = Some(emission.clone());
            match group {
                Some(prefix) => out.common_prefixes.push(prefix),
                None => out.records.push(record),
            }
        }

        if fetched < FETCH_BATCH {
            break;
        }
    }

    Ok(out)
}
