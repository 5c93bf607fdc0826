//! Case folding shared by every by-name lookup (columns, members, parameters).

/// Lowercase `name` one character at a time.
///
/// Per-character folding keeps `fold_name` and [`names_match`] in agreement;
/// `str::to_lowercase` treats a final sigma differently.
pub(crate) fn fold_name(name: &str) -> String {
    name.chars().flat_map(char::to_lowercase).collect()
}

/// Whether two names are equal ignoring case, including non-ASCII letters.
pub(crate) fn names_match(a: &str, b: &str) -> bool {
    a == b
        || a.chars()
            .flat_map(char::to_lowercase)
            .eq(b.chars().flat_map(char::to_lowercase))
}
