//! URI template parsing and derived match forms
//!
//! The grammar follows the API platform path template syntax: literal
//! segments, `*` (one segment), `**` (the remaining path, tail position
//! only), `{field}` / `{field.path=sub/pattern}` captures, and an optional
//! trailing `:verb`. The parser is hand-rolled; the `regex` crate is only
//! used to validate emitted patterns against the data-plane size bound.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Upper bound on the compiled size of any emitted route regex. Patterns
/// whose compiled program exceeds this are rejected, mirroring the RE2
/// program-size limit the data plane enforces.
pub const MAX_COMPILED_REGEX_BYTES: usize = 64 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("uri template must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("empty segment in uri template: {0}")]
    EmptySegment(String),

    #[error("unbalanced braces in uri template: {0}")]
    UnbalancedBraces(String),

    #[error("invalid segment '{segment}' in uri template: {template}")]
    InvalidSegment { segment: String, template: String },

    #[error("nested variable in uri template: {0}")]
    NestedVariable(String),

    #[error("'**' must be the final segment of uri template: {0}")]
    MisplacedDoubleWildcard(String),

    #[error("duplicate variable name '{name}' in uri template: {template}")]
    DuplicateVariable { name: String, template: String },

    #[error("invalid variable name '{name}' in uri template: {template}")]
    InvalidVariableName { name: String, template: String },

    #[error("invalid verb '{verb}' in uri template: {template}")]
    InvalidVerb { verb: String, template: String },

    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("regex '{0}' exceeds the data-plane program size limit")]
    RegexTooLarge(String),
}

/// One path segment of a parsed template.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    SingleWildcard,
    DoubleWildcard,
    Variable(Variable),
}

/// A named capture: `{field.path}` or `{field.path=sub/pattern}`.
#[derive(Debug, Clone, PartialEq)]
struct Variable {
    field_path: Vec<String>,
    pattern: Vec<SubSegment>,
}

#[derive(Debug, Clone, PartialEq)]
enum SubSegment {
    Literal(String),
    SingleWildcard,
    DoubleWildcard,
}

impl Variable {
    /// A bare `{field}` capture, equivalent to `{field=*}`.
    fn has_default_pattern(&self) -> bool {
        self.pattern == [SubSegment::SingleWildcard]
    }
}

/// Flattened match position used by the ordering comparator. A variable
/// contributes its literal sub-segments as literals and its wildcard
/// sub-segments as captures.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchAtom {
    Literal(String),
    SingleWildcard,
    Capture,
    DoubleWildcard,
}

impl MatchAtom {
    pub(crate) fn rank(&self) -> u8 {
        match self {
            MatchAtom::Literal(_) => 0,
            MatchAtom::SingleWildcard => 1,
            MatchAtom::Capture => 2,
            MatchAtom::DoubleWildcard => 3,
        }
    }
}

/// A parsed URI template.
#[derive(Debug, Clone, PartialEq)]
pub struct UriTemplate {
    segments: Vec<Segment>,
    verb: Option<String>,
    origin: String,
}

impl UriTemplate {
    /// Parse a path template string.
    pub fn parse(input: &str) -> Result<Self, TemplateError> {
        if !input.starts_with('/') {
            return Err(TemplateError::MissingLeadingSlash(input.to_string()));
        }

        // One scan for brace balance and the verb separator. A verb is the
        // text after the last ':' that sits outside braces and after the
        // last '/'.
        let mut depth = 0usize;
        let mut verb_sep = None;
        for (i, c) in input.char_indices() {
            match c {
                '{' => {
                    if depth > 0 {
                        return Err(TemplateError::NestedVariable(input.to_string()));
                    }
                    depth += 1;
                }
                '}' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| TemplateError::UnbalancedBraces(input.to_string()))?;
                }
                ':' if depth == 0 => verb_sep = Some(i),
                '/' if depth == 0 => verb_sep = None,
                _ => {}
            }
        }
        if depth != 0 {
            return Err(TemplateError::UnbalancedBraces(input.to_string()));
        }

        let (path_part, verb) = match verb_sep {
            Some(i) => {
                let verb = &input[i + 1..];
                if verb.is_empty() || verb.contains('{') || verb.contains('}') {
                    return Err(TemplateError::InvalidVerb {
                        verb: verb.to_string(),
                        template: input.to_string(),
                    });
                }
                (&input[..i], Some(verb.to_string()))
            }
            None => (input, None),
        };

        let mut segments = Vec::new();
        if path_part != "/" {
            for piece in path_part[1..].split('/') {
                segments.push(Self::parse_segment(piece, input)?);
            }
        }

        let template = UriTemplate {
            segments,
            verb,
            origin: input.to_string(),
        };
        template.check_double_wildcard_position()?;
        template.check_variable_names()?;
        Ok(template)
    }

    fn parse_segment(piece: &str, template: &str) -> Result<Segment, TemplateError> {
        match piece {
            "" => Err(TemplateError::EmptySegment(template.to_string())),
            "*" => Ok(Segment::SingleWildcard),
            "**" => Ok(Segment::DoubleWildcard),
            p if p.starts_with('{') && p.ends_with('}') && p.len() > 2 => {
                Ok(Segment::Variable(Self::parse_variable(&p[1..p.len() - 1], template)?))
            }
            p if p.contains('{') || p.contains('}') => Err(TemplateError::InvalidSegment {
                segment: p.to_string(),
                template: template.to_string(),
            }),
            p => Ok(Segment::Literal(p.to_string())),
        }
    }

    fn parse_variable(inner: &str, template: &str) -> Result<Variable, TemplateError> {
        let (name, sub) = match inner.split_once('=') {
            Some((name, sub)) => (name, Some(sub)),
            None => (inner, None),
        };

        let field_path: Vec<String> = name.split('.').map(str::to_string).collect();
        for component in &field_path {
            if !is_identifier(component) {
                return Err(TemplateError::InvalidVariableName {
                    name: name.to_string(),
                    template: template.to_string(),
                });
            }
        }

        let pattern = match sub {
            None => vec![SubSegment::SingleWildcard],
            Some(sub) => {
                let mut pattern = Vec::new();
                for piece in sub.split('/') {
                    pattern.push(match piece {
                        "" => return Err(TemplateError::EmptySegment(template.to_string())),
                        "*" => SubSegment::SingleWildcard,
                        "**" => SubSegment::DoubleWildcard,
                        p if p.contains('{') || p.contains('}') => {
                            return Err(TemplateError::NestedVariable(template.to_string()))
                        }
                        p => SubSegment::Literal(p.to_string()),
                    });
                }
                pattern
            }
        };

        Ok(Variable { field_path, pattern })
    }

    /// `**` consumes the rest of the path, so it is only legal as the very
    /// last match position.
    fn check_double_wildcard_position(&self) -> Result<(), TemplateError> {
        let atoms = self.match_atoms();
        for (i, atom) in atoms.iter().enumerate() {
            if *atom == MatchAtom::DoubleWildcard && i + 1 != atoms.len() {
                return Err(TemplateError::MisplacedDoubleWildcard(self.origin.clone()));
            }
        }
        Ok(())
    }

    fn check_variable_names(&self) -> Result<(), TemplateError> {
        let mut seen = HashSet::new();
        for variable in self.variables() {
            let name = variable.field_path.join(".");
            if !seen.insert(name.clone()) {
                return Err(TemplateError::DuplicateVariable {
                    name,
                    template: self.origin.clone(),
                });
            }
        }
        Ok(())
    }

    fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(v) => Some(v),
            _ => None,
        })
    }

    /// The template string as given to `parse`, for diagnostics. Not
    /// affected by variable renaming.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// True when the template matches exactly one path: all segments are
    /// literals, no wildcards and no captures.
    pub fn is_exact_match(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn has_variables(&self) -> bool {
        self.variables().next().is_some()
    }

    /// Dotted field paths of all captures, in segment order.
    pub fn variable_names(&self) -> Vec<String> {
        self.variables().map(|v| v.field_path.join(".")).collect()
    }

    /// Render the template as a concrete path. For exact-match templates
    /// this is the routeable path itself; for templates with captures it is
    /// the url-template form consumed by the path-rewrite filter, with
    /// variables rendered as `{field.path}` (or `{field.path=sub/pattern}`
    /// for non-trivial sub-patterns). The trailing slash, when requested,
    /// goes before the verb.
    pub fn exact_match_string(&self, trailing_slash: bool) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Literal(s) => path.push_str(s),
                Segment::SingleWildcard => path.push('*'),
                Segment::DoubleWildcard => path.push_str("**"),
                Segment::Variable(v) => {
                    path.push('{');
                    path.push_str(&v.field_path.join("."));
                    if !v.has_default_pattern() {
                        path.push('=');
                        for (i, sub) in v.pattern.iter().enumerate() {
                            if i > 0 {
                                path.push('/');
                            }
                            match sub {
                                SubSegment::Literal(s) => path.push_str(s),
                                SubSegment::SingleWildcard => path.push('*'),
                                SubSegment::DoubleWildcard => path.push_str("**"),
                            }
                        }
                    }
                    path.push('}');
                }
            }
        }
        if path.is_empty() {
            path.push('/');
        }
        if trailing_slash && !path.ends_with('/') {
            path.push('/');
        }
        if let Some(verb) = &self.verb {
            path.push(':');
            path.push_str(verb);
        }
        path
    }

    /// A full-path regex for the template. Captures compile to plain
    /// groups; their names are carried separately in `variable_names`.
    pub fn regex(&self) -> String {
        let mut re = String::from("^");
        for segment in &self.segments {
            re.push('/');
            match segment {
                Segment::Literal(s) => re.push_str(&regex::escape(s)),
                Segment::SingleWildcard => re.push_str("[^/]+"),
                Segment::DoubleWildcard => re.push_str(".*"),
                Segment::Variable(v) => {
                    re.push('(');
                    for (i, sub) in v.pattern.iter().enumerate() {
                        if i > 0 {
                            re.push('/');
                        }
                        match sub {
                            SubSegment::Literal(s) => re.push_str(&regex::escape(s)),
                            SubSegment::SingleWildcard => re.push_str("[^/]+"),
                            SubSegment::DoubleWildcard => re.push_str(".*"),
                        }
                    }
                    re.push(')');
                }
            }
        }
        if self.segments.is_empty() {
            re.push('/');
        }
        if let Some(verb) = &self.verb {
            re.push(':');
            re.push_str(&regex::escape(verb));
        }
        re.push('$');
        re
    }

    /// Rename capture field-path components in place. Each component whose
    /// name appears as a key in `renames` is replaced with the mapped value.
    pub fn replace_variable_field(&mut self, renames: &HashMap<String, String>) {
        for segment in &mut self.segments {
            if let Segment::Variable(v) = segment {
                for component in &mut v.field_path {
                    if let Some(renamed) = renames.get(component) {
                        *component = renamed.clone();
                    }
                }
            }
        }
    }

    pub(crate) fn match_atoms(&self) -> Vec<MatchAtom> {
        let mut atoms = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => atoms.push(MatchAtom::Literal(s.clone())),
                Segment::SingleWildcard => atoms.push(MatchAtom::SingleWildcard),
                Segment::DoubleWildcard => atoms.push(MatchAtom::DoubleWildcard),
                Segment::Variable(v) => {
                    for sub in &v.pattern {
                        atoms.push(match sub {
                            SubSegment::Literal(s) => MatchAtom::Literal(s.clone()),
                            SubSegment::SingleWildcard => MatchAtom::Capture,
                            SubSegment::DoubleWildcard => MatchAtom::DoubleWildcard,
                        });
                    }
                }
            }
        }
        atoms
    }

    /// Number of wildcard match positions, counting wildcards inside
    /// captures.
    pub(crate) fn wildcard_count(&self) -> usize {
        self.match_atoms()
            .iter()
            .filter(|a| !matches!(a, MatchAtom::Literal(_)))
            .count()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a pattern against the data-plane program-size bound.
pub fn validate_regex_program_size(pattern: &str) -> Result<(), TemplateError> {
    match regex::RegexBuilder::new(pattern)
        .size_limit(MAX_COMPILED_REGEX_BYTES)
        .build()
    {
        Ok(_) => Ok(()),
        Err(regex::Error::CompiledTooBig(_)) => {
            Err(TemplateError::RegexTooLarge(pattern.to_string()))
        }
        Err(e) => Err(TemplateError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        }),
    }
}
