use crate::syntax::Expr;
use crate::translate::TranslationError;

/// A segment of a literal access chain.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathSegment {
    /// `$.name`, `$["name"]`
    Field(String),

    /// `$.items[0]`; only integer literals produce indices.
    Index(i64),
}

/// Where an access chain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathBase {
    /// `$`
    Root,
    /// `@`
    Element,
}

/// Splits `$.a.b[0]` into its base and literal segments.
///
/// Returns `None` for anything that is not a chain of literal keys on `$`
/// or `@`, such as computed keys or accesses on method results.
pub(crate) fn extract_path(expr: &Expr) -> Option<(PathBase, Vec<PathSegment>)> {
    let mut segments = Vec::new();
    let base = extract_path_recursive(expr, &mut segments)?;
    Some((base, segments))
}

fn extract_path_recursive(expr: &Expr, segments: &mut Vec<PathSegment>) -> Option<PathBase> {
    match expr {
        Expr::Root => Some(PathBase::Root),
        Expr::LambdaParam => Some(PathBase::Element),
        Expr::Access { object, key } => {
            let base = extract_path_recursive(object, segments)?;
            match key.as_ref() {
                Expr::Key(name) | Expr::String(name) => segments.push(PathSegment::Field(name.clone())),
                Expr::Integer(n) => segments.push(PathSegment::Index(*n)),
                _ => return None,
            }
            Some(base)
        }
        _ => None,
    }
}

/// True if `name` can appear as one segment of a dotted path.
pub(crate) fn is_path_segment(name: &str) -> bool {
    !name.is_empty() && !name.contains('.') && !name.starts_with('$')
}

/// Joins segments with `.`; array indices become numeric segments, which the
/// match language resolves positionally.
pub(crate) fn dotted(segments: &[PathSegment]) -> Option<String> {
    let mut parts = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            PathSegment::Field(name) if is_path_segment(name) => parts.push(name.clone()),
            PathSegment::Index(n) if *n >= 0 => parts.push(n.to_string()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

/// A field path rooted at `$` made of named fields only, as required for
/// stage targets such as `~($.a.b := ...)`, `sort($.a)` and `unwind($.a)`.
pub(crate) fn target_path(expr: &Expr) -> Result<String, TranslationError> {
    let invalid = || {
        TranslationError::unsupported(
            expr,
            "target must be a field path like $.field or $.parent.child",
        )
    };
    let (base, segments) = extract_path(expr).ok_or_else(invalid)?;
    if base != PathBase::Root {
        return Err(invalid());
    }
    if segments
        .iter()
        .any(|segment| matches!(segment, PathSegment::Index(_)))
    {
        return Err(TranslationError::unsupported(
            expr,
            "target cannot contain array indices",
        ));
    }
    dotted(&segments).ok_or_else(invalid)
}
