use std::fmt::Display;

/// Separator placed between identifiers in a query parameter.
const SEPARATOR_LEN: usize = 1;

/// Splits identifiers into groups whose comma-joined form, appended to
/// `prefix`, stays within `max_len` characters.
///
/// Packing is greedy and order preserving. At least one group is always
/// produced (an empty one for empty input), and an identifier that alone
/// exceeds the budget is emitted in a group of its own rather than dropped.
pub fn chunk<I>(prefix: &str, ids: I, max_len: usize) -> Chunks<I::IntoIter>
where
    I: IntoIterator,
    I::Item: Display,
{
    Chunks {
        ids: ids.into_iter(),
        budget: max_len.saturating_sub(prefix.len()),
        carry: None,
        finished: false,
    }
}

/// Lazy iterator returned by [`chunk`].
#[derive(Debug)]
pub struct Chunks<I> {
    ids: I,
    budget: usize,
    carry: Option<String>,
    finished: bool,
}

impl<I> Iterator for Chunks<I>
where
    I: Iterator,
    I::Item: Display,
{
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut group = Vec::new();
        let mut used = 0;
        if let Some(first) = self.carry.take() {
            used = first.len();
            group.push(first);
        }

        for id in self.ids.by_ref() {
            let id = id.to_string();
            if group.is_empty() {
                used = id.len();
                group.push(id);
                continue;
            }
            let next_len = used + SEPARATOR_LEN + id.len();
            if next_len <= self.budget {
                used = next_len;
                group.push(id);
            } else {
                self.carry = Some(id);
                return Some(group);
            }
        }

        self.finished = true;
        Some(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_one_empty_group() {
        let groups: Vec<_> = chunk("https://x/rows?ids=", Vec::<i64>::new(), 2000).collect();
        assert_eq!(groups, vec![Vec::<String>::new()]);
    }

    #[test]
    fn small_input_fits_one_group() {
        let groups: Vec<_> = chunk("base", [1, 22, 333], 2000).collect();
        assert_eq!(groups, vec![vec!["1", "22", "333"]]);
    }

    #[test]
    fn groups_respect_the_budget() {
        let prefix = "p".repeat(50);
        let ids: Vec<String> = (0..2500).map(|n| format!("{n:06}")).collect();

        let groups: Vec<_> = chunk(&prefix, &ids, 2000).collect();

        assert!(groups.len() > 1);
        for group in &groups {
            assert!(prefix.len() + group.join(",").len() <= 2000);
        }
        let flattened: Vec<String> = groups.into_iter().flatten().collect();
        assert_eq!(flattened, ids);
    }

    #[test]
    fn budget_is_filled_exactly() {
        // "aa,bb" is 5 characters, adding ",cc" would make 8.
        let groups: Vec<_> = chunk("xxxxx", ["aa", "bb", "cc"], 10).collect();
        assert_eq!(groups, vec![vec!["aa", "bb"], vec!["cc"]]);
    }

    #[test]
    fn oversized_identifier_is_emitted_alone() {
        let long = "z".repeat(40);
        let groups: Vec<_> = chunk("prefix", ["a", long.as_str(), "b"], 20).collect();
        assert_eq!(
            groups,
            vec![vec!["a".to_string()], vec![long.clone()], vec!["b".to_string()]]
        );
    }
}
