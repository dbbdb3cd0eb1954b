use anyhow::{Result, bail};

use crate::ir::{Block, TypeDecl};
use crate::model::SemanticModel;
use crate::syntax::{Span, indent_unit, line_indent, newline, same_line, starts_line};

/// Replacement of a byte range in a document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct TextEdit {
    pub(crate) span: Span,
    pub(crate) text: String,
}

impl TextEdit {
    pub(crate) fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            span: Span::new(offset, offset),
            text: text.into(),
        }
    }

    pub(crate) fn replace(span: Span, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }
}

/// Apply edits to `text`.
///
/// Insertions at the same offset keep their relative order. Overlapping edits
/// are rejected.
pub(crate) fn apply_edits(text: &str, edits: &[TextEdit]) -> Result<String> {
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by_key(|edit| (edit.span.start, edit.span.end));
    for edit in &ordered {
        if edit.span.start > edit.span.end
            || edit.span.end > text.len()
            || !text.is_char_boundary(edit.span.start)
            || !text.is_char_boundary(edit.span.end)
        {
            bail!(
                "edit {}..{} is outside the document",
                edit.span.start,
                edit.span.end
            );
        }
    }
    for pair in ordered.windows(2) {
        if pair[0].span.end > pair[1].span.start {
            bail!(
                "overlapping edits at {}..{} and {}..{}",
                pair[0].span.start,
                pair[0].span.end,
                pair[1].span.start,
                pair[1].span.end
            );
        }
    }

    let inserted: usize = ordered.iter().map(|edit| edit.text.len()).sum();
    let mut output = String::with_capacity(text.len() + inserted);
    let mut cursor = 0;
    for edit in ordered {
        output.push_str(&text[cursor..edit.span.start]);
        output.push_str(&edit.text);
        cursor = edit.span.end;
    }
    output.push_str(&text[cursor..]);
    Ok(output)
}

fn missing_namespaces<'a>(
    model: &SemanticModel,
    offset: usize,
    namespaces: &[&'a str],
) -> Vec<&'a str> {
    namespaces
        .iter()
        .copied()
        .filter(|namespace| !model.has_using(offset, namespace))
        .collect()
}

/// Import `namespaces` after the last compilation-unit `using` directive.
///
/// Namespaces already visible at `offset` are skipped; `None` when nothing is missing.
pub(crate) fn append_usings(
    model: &SemanticModel,
    text: &str,
    offset: usize,
    namespaces: &[&str],
) -> Option<TextEdit> {
    let missing = missing_namespaces(model, offset, namespaces);
    if missing.is_empty() {
        return None;
    }
    let nl = newline(text);
    let last_top_level = model.usings().iter().rfind(|using| using.top_level);
    if let Some(last) = last_top_level {
        let directives: String = missing
            .iter()
            .map(|namespace| format!("{nl}using {namespace};"))
            .collect();
        return Some(TextEdit::insert(last.span.end, directives));
    }
    let directives: String = missing
        .iter()
        .map(|namespace| format!("using {namespace};{nl}"))
        .collect();
    match model.first_item() {
        Some(first) => Some(TextEdit::insert(first, format!("{directives}{nl}"))),
        None => {
            let separator = if text.is_empty() || text.ends_with('\n') {
                ""
            } else {
                nl
            };
            Some(TextEdit::insert(text.len(), format!("{separator}{directives}")))
        }
    }
}

/// Import `namespaces` in front of the first `using` directive visible at `offset`,
/// matching its indentation.
///
/// Falls back to [`append_usings`] when no directive is in scope.
pub(crate) fn prepend_usings(
    model: &SemanticModel,
    text: &str,
    offset: usize,
    namespaces: &[&str],
) -> Option<TextEdit> {
    let missing = missing_namespaces(model, offset, namespaces);
    if missing.is_empty() {
        return None;
    }
    let first_visible = model
        .usings()
        .iter()
        .find(|using| using.scope.encloses(Span::new(offset, offset)));
    let Some(first) = first_visible else {
        return append_usings(model, text, offset, &missing);
    };
    let nl = newline(text);
    let indent = line_indent(text, first.span.start);
    let directives: String = missing
        .iter()
        .map(|namespace| format!("using {namespace};{nl}{indent}"))
        .collect();
    Some(TextEdit::insert(first.span.start, directives))
}

/// Add `[attribute]` to a member or type declaration.
///
/// Goes after the existing attribute lists: on the same line when the declaration
/// continues there, otherwise on a line of its own.
pub(crate) fn add_declaration_attribute(
    text: &str,
    declaration: Span,
    lists: &[Span],
    attribute: &str,
) -> TextEdit {
    let nl = newline(text);
    let indent = line_indent(text, declaration.start);
    match lists.last() {
        Some(last) => {
            let rest = &text[last.end..declaration.end];
            let next = rest
                .find(|c: char| !c.is_whitespace())
                .map(|index| last.end + index)
                .unwrap_or(declaration.end);
            if same_line(text, last.end, next) {
                TextEdit::insert(last.end, format!(" [{attribute}]"))
            } else {
                TextEdit::insert(last.end, format!("{nl}{indent}[{attribute}]"))
            }
        }
        None if starts_line(text, declaration.start) => {
            TextEdit::insert(declaration.start, format!("[{attribute}]{nl}{indent}"))
        }
        None => TextEdit::insert(declaration.start, format!("[{attribute}] ")),
    }
}

/// Add `[attribute]` to a formal parameter, inline.
pub(crate) fn add_parameter_attribute(parameter: Span, lists: &[Span], attribute: &str) -> TextEdit {
    match lists.last() {
        Some(last) => TextEdit::insert(last.end, format!(" [{attribute}]")),
        None => TextEdit::insert(parameter.start, format!("[{attribute}] ")),
    }
}

/// Insert `statement` so that it becomes statement number `index` of `block`.
pub(crate) fn insert_statement(
    text: &str,
    block: &Block,
    index: usize,
    statement: &str,
) -> TextEdit {
    insert_statements(text, block, index, &[statement.to_string()])
}

/// Insert consecutive statements starting at statement number `index` of `block`.
///
/// Indentation is copied from the first statement, or derived from the braces of
/// an empty block.
pub(crate) fn insert_statements(
    text: &str,
    block: &Block,
    index: usize,
    statements: &[String],
) -> TextEdit {
    let nl = newline(text);
    let Some(first) = block.statements.first() else {
        return insert_into_empty_block(text, block.span, statements);
    };
    let multiline = starts_line(text, first.span.start);
    let separator = if multiline {
        format!("{nl}{}", line_indent(text, first.span.start))
    } else {
        " ".to_string()
    };
    let joined = statements.join(&separator);
    if index == 0 {
        return TextEdit::insert(first.span.start, format!("{joined}{separator}"));
    }
    let previous = &block.statements[index.min(block.statements.len()) - 1];
    TextEdit::insert(previous.span.end, format!("{separator}{joined}"))
}

fn insert_into_empty_block(text: &str, block: Span, statements: &[String]) -> TextEdit {
    let open = block.start + 1;
    let close = block.end.saturating_sub(1).max(open);
    if same_line(text, block.start, close) {
        return TextEdit::replace(
            Span::new(open, close),
            format!(" {} ", statements.join(" ")),
        );
    }
    let nl = newline(text);
    let indent = nested_indent(line_indent(text, block.start));
    let lines: String = statements
        .iter()
        .map(|statement| format!("{nl}{indent}{statement}"))
        .collect();
    TextEdit::insert(open, lines)
}

/// Append a member to the end of a type body, separated from the previous member by
/// a blank line.
///
/// `lines` are relative to the member indentation; empty lines stay empty.
pub(crate) fn append_member(text: &str, decl: &TypeDecl, lines: &[String]) -> Option<TextEdit> {
    let body = decl.body?;
    let nl = newline(text);
    let type_indent = line_indent(text, decl.span.start);
    let indent = nested_indent(type_indent);
    let member = indent_lines(lines, &indent, nl);
    match decl.members.iter().map(|member| member.span.end).max() {
        Some(end) => Some(TextEdit::insert(end, format!("{nl}{nl}{member}"))),
        None => {
            let close = body.end.saturating_sub(1);
            if same_line(text, body.start, close) {
                Some(TextEdit::replace(
                    Span::new(body.start + 1, close),
                    format!("{nl}{member}{nl}{type_indent}"),
                ))
            } else {
                Some(TextEdit::insert(body.start + 1, format!("{nl}{member}")))
            }
        }
    }
}

/// Insert a declaration after `anchor`, separated by a blank line and indented like
/// the line `anchor` starts on.
pub(crate) fn insert_after(text: &str, anchor: Span, lines: &[String]) -> TextEdit {
    let nl = newline(text);
    let indent = line_indent(text, anchor.start);
    let declaration = indent_lines(lines, indent, nl);
    TextEdit::insert(anchor.end, format!("{nl}{nl}{declaration}"))
}

fn indent_lines(lines: &[String], indent: &str, nl: &str) -> String {
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join(nl)
}

/// Indentation one level deeper than `indent`.
pub(crate) fn nested_indent(indent: &str) -> String {
    format!("{indent}{}", indent_unit(indent))
}
