//! Lexical splitting of a source block into independently executable
//! top-level statements.
//!
//! The shell front end submits a whole block of text at once; before
//! execution it must be cut into pieces that each compile in "single
//! statement" mode. The split is purely lexical: we walk the token stream
//! and cut after every logical newline that occurs at indentation depth 0,
//! except when the next statement starts with a continuation keyword
//! (`else`, `except`, `finally`), which belongs to the block before it.
//!
//! Splitting never fails. If the lexer hits an unterminated construct it
//! simply stops producing indentation structure and we return fewer, larger
//! fragments; the compile-validation pass in [`crate::session`] is the one
//! that reports syntax errors and incomplete input.

use ruff_python_ast::token::TokenKind;
use ruff_python_parser::{Mode, ParseOptions, parse_unchecked};
use ruff_text_size::Ranged;

/// Splits `source` into top-level fragments.
///
/// Each fragment is a verbatim substring of `source`, fragments are
/// contiguous, and their concatenation reproduces `source` exactly. Every
/// fragment except the last ends with a newline, so the starting line of
/// fragment `i` inside the submission is the newline count of fragments
/// `0..i`. The final fragment is returned exactly as submitted, without any
/// appended newline.
///
/// Empty input yields a single empty fragment.
pub fn split(source: &str) -> Vec<&str> {
    // Byte offset of the start of each line. A trailing '\n' contributes a
    // final empty line whose start is source.len().
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(source.match_indices('\n').map(|(at, _)| at + 1))
        .collect();
    let row_of = |offset: usize| line_starts.partition_point(|&start| start <= offset) - 1;

    let parsed = parse_unchecked(source, ParseOptions::from(Mode::Module));

    // Rows (0-based) that begin a new fragment. INDENT/DEDENT arrive *after*
    // the NEWLINE token that ends a line, so the decision for a pending
    // newline is made when the next significant token shows up.
    let mut first_lines: Vec<usize> = vec![0];
    let mut depth = 0u32;
    let mut last_was_newline = false;

    for token in parsed.tokens().iter() {
        let kind = token.kind();
        if matches!(kind, TokenKind::Comment | TokenKind::NonLogicalNewline) {
            continue;
        }
        let offset = token.start().to_usize();
        let row = row_of(offset);

        if last_was_newline {
            if depth == 0 && !matches!(kind, TokenKind::Indent | TokenKind::EndOfFile) {
                push_split(&mut first_lines, row);
            } else if depth == 1
                && kind == TokenKind::Dedent
                && line_starts.get(row) == Some(&offset)
            {
                // A dedent back to top level starts a fragment at the line it
                // lands on. The line-start check skips the synthetic dedents
                // the lexer emits at end-of-file when the source does not end
                // with a newline; those sit mid-line and are not boundaries.
                push_split(&mut first_lines, row);
                last_was_newline = false;
            }
        }

        // else/except/finally continue the block before them, so a split
        // recorded at their own line is cancelled. The initial split point is
        // never cancelled: a leading continuation keyword is a syntax error
        // the compile phase will report.
        if matches!(kind, TokenKind::Else | TokenKind::Except | TokenKind::Finally)
            && first_lines.len() > 1
            && first_lines.last() == Some(&row)
        {
            first_lines.pop();
        }

        match kind {
            TokenKind::Indent => depth += 1,
            TokenKind::Dedent => depth = depth.saturating_sub(1),
            _ => last_was_newline = kind == TokenKind::Newline,
        }
    }

    let mut fragments: Vec<&str> = first_lines
        .iter()
        .enumerate()
        .map(|(index, &row)| {
            let start = line_starts[row];
            let end = first_lines
                .get(index + 1)
                .map_or(source.len(), |&next| line_starts[next]);
            &source[start..end]
        })
        .collect();

    // Newline-terminated input would otherwise produce a final zero-length
    // fragment (the empty line after the last '\n').
    if fragments.len() > 1 && fragments.last().is_some_and(|last| last.is_empty()) {
        fragments.pop();
    }
    fragments
}

fn push_split(first_lines: &mut Vec<usize>, row: usize) {
    if first_lines.last().is_some_and(|&last| row > last) {
        first_lines.push(row);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::split;

    #[track_caller]
    fn assert_lossless(source: &str) {
        let fragments = split(source);
        assert_eq!(
            fragments.concat(),
            source,
            "concatenated fragments must reproduce the input"
        );
    }

    #[test]
    fn two_simple_statements() {
        assert_eq!(split("x = 1\ny = 2\n"), vec!["x = 1\n", "y = 2\n"]);
    }

    #[test]
    fn empty_source_is_one_empty_fragment() {
        assert_eq!(split(""), vec![""]);
    }

    #[test]
    fn single_line_without_newline_is_verbatim() {
        // The final fragment is reported exactly as submitted; any newline
        // needed for compilation is added by the engine, not here.
        assert_eq!(split("x = 1"), vec!["x = 1"]);
    }

    #[test]
    fn newline_terminated_input_has_no_empty_tail() {
        assert_eq!(split("x = 1\n"), vec!["x = 1\n"]);
    }

    #[test]
    fn block_stays_whole() {
        assert_eq!(
            split("if True:\n    x = 1\n    y = 2\n"),
            vec!["if True:\n    x = 1\n    y = 2\n"]
        );
    }

    #[test]
    fn statement_after_block_starts_new_fragment() {
        assert_eq!(
            split("def f():\n    pass\nx = f()\n"),
            vec!["def f():\n    pass\n", "x = f()\n"]
        );
    }

    #[test]
    fn try_except_is_one_fragment() {
        assert_eq!(
            split("try:\n    1/0\nexcept Exception:\n    pass\n"),
            vec!["try:\n    1/0\nexcept Exception:\n    pass\n"]
        );
    }

    #[test]
    fn if_else_is_one_fragment() {
        assert_eq!(
            split("if x:\n    a()\nelse:\n    b()\n"),
            vec!["if x:\n    a()\nelse:\n    b()\n"]
        );
    }

    #[test]
    fn try_finally_is_one_fragment() {
        assert_eq!(
            split("try:\n    f()\nfinally:\n    g()\n"),
            vec!["try:\n    f()\nfinally:\n    g()\n"]
        );
    }

    #[test]
    fn continuation_chain_then_new_statement() {
        assert_eq!(
            split("try:\n    f()\nexcept ValueError:\n    pass\nfinally:\n    g()\nx = 1\n"),
            vec![
                "try:\n    f()\nexcept ValueError:\n    pass\nfinally:\n    g()\n",
                "x = 1\n"
            ]
        );
    }

    #[test]
    fn comment_does_not_trigger_a_split() {
        // A split point is only recorded at the next significant token, so
        // comment lines ride along with the fragment before them.
        assert_eq!(
            split("x = 1\n# about y\ny = 2\n"),
            vec!["x = 1\n# about y\n", "y = 2\n"]
        );
    }

    #[test]
    fn blank_lines_do_not_split() {
        assert_eq!(split("x = 1\n\n\ny = 2\n"), vec!["x = 1\n\n\n", "y = 2\n"]);
    }

    #[test]
    fn bracketed_lines_stay_in_one_statement() {
        assert_eq!(
            split("x = [\n    1,\n    2,\n]\ny = 2\n"),
            vec!["x = [\n    1,\n    2,\n]\n", "y = 2\n"]
        );
    }

    #[test]
    fn nested_blocks_then_top_level() {
        assert_eq!(
            split("if a:\n    if b:\n        c()\nd()\n"),
            vec!["if a:\n    if b:\n        c()\n", "d()\n"]
        );
    }

    #[test]
    fn block_without_trailing_newline_stays_whole() {
        assert_eq!(split("if True:\n    pass"), vec!["if True:\n    pass"]);
    }

    #[test]
    fn unbalanced_block_is_returned_not_rejected() {
        // Unterminated constructs are not the splitter's problem; it returns
        // whatever fragments it can and the compile phase reports the error.
        assert_lossless("x = (\ny = 2\n");
        assert_lossless("if True:\n");
        assert_lossless("def f(:\n    pass\n");
    }

    #[test]
    fn leading_else_does_not_lose_the_source() {
        assert_eq!(split("else:\n    pass\n"), vec!["else:\n    pass\n"]);
    }

    #[test]
    fn concatenation_is_lossless() {
        for source in [
            "",
            "x = 1",
            "x = 1\n",
            "x = 1\ny = 2\n",
            "if a:\n    b()\nelse:\n    c()\nd()\n",
            "try:\n    f()\nexcept Exception:\n    pass\n# tail comment\n",
            "x = 1 ;  y = 2\nz\n",
            "\n\n",
            "x = (\n",
        ] {
            assert_lossless(source);
        }
    }
}
