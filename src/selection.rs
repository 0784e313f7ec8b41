/// Ordering and prefix-bound filtering applied to the discovered directory
/// names.
///
/// Names are compared as plain strings (Unicode scalar order, which for
/// UTF-8 is byte order). Bounds compare only the first `len(bound)`
/// characters of a name; a shorter name is compared whole, so `"2023"`
/// sorts before the bound `"2023-03"` and is kept by `before`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub ascending: bool,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl SelectionPolicy {
    pub fn select(&self, names: Vec<String>) -> Vec<String> {
        select(names, self.ascending, self.before.as_deref(), self.after.as_deref())
    }
}

/// Sort `names` (descending unless `ascending`) and keep those inside the
/// optional bounds.
pub fn select(
    mut names: Vec<String>,
    ascending: bool,
    before: Option<&str>,
    after: Option<&str>,
) -> Vec<String> {
    if ascending {
        names.sort();
    } else {
        names.sort_by(|a, b| b.cmp(a));
    }
    names.retain(|n| {
        before.is_none_or(|b| prefix(n, b) < b) && after.is_none_or(|a| prefix(n, a) > a)
    });
    names
}

/// First `bound.chars().count()` characters of `name`, or all of it.
fn prefix<'a>(name: &'a str, bound: &str) -> &'a str {
    let len = bound.chars().count();
    match name.char_indices().nth(len) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}
