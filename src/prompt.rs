//! Interactive prompts
//!
//! Reads the persona selection and the article from a terminal (or any
//! `BufRead`). Typing one of the quit words at either prompt aborts the run.

use std::io::{BufRead, Write};

use tracing::debug;

use crate::error::{Error, Result};
use crate::persona::Selection;

/// Line that ends a multi-line article
const END_MARKER: &str = "/end";

const QUIT_WORDS: &[&str] = &["/exit", "/quit", "exit", "quit", "q"];

const ARTICLE_PROMPT: &str = "请输入链接或者文章内容（可含空行），结束请输入 /end ：\n 退出请输入quit";

fn is_quit(line: &str) -> bool {
    let word = line.trim().to_lowercase();
    QUIT_WORDS.contains(&word.as_str())
}

/// Read one line, dropping undecodable bytes; `None` at end of input
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut raw = Vec::new();
    if reader.read_until(b'\n', &mut raw)? == 0 {
        return Ok(None);
    }
    let line: String = String::from_utf8_lossy(&raw)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect();
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Read lines until `/end` or end of input
///
/// Leading whitespace of every line is dropped. Returns `None` when the input
/// ended before anything was read.
pub fn read_multiline<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut lines: Vec<String> = Vec::new();
    loop {
        let Some(line) = read_line(reader)? else {
            return Ok((!lines.is_empty()).then(|| lines.join("\n")));
        };
        if line.trim() == END_MARKER {
            return Ok(Some(lines.join("\n")));
        }
        if is_quit(&line) {
            return Err(Error::InputAborted);
        }
        lines.push(line.trim_start().to_string());
    }
}

/// Terminal prompts for one request
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Ask which personas to run, re-asking until the answer fits the catalog
    pub fn read_selection(&mut self, menu: &str, catalog_len: usize) -> Result<Selection> {
        loop {
            write!(
                self.output,
                "请选择模板{}\t**默认模板全选(如需全选直接回车)**:\n输入示例：123,12,23,13,1,2,3\n",
                menu
            )?;
            self.output.flush()?;

            let Some(line) = read_line(&mut self.input)? else {
                return Ok(Selection::All);
            };
            if is_quit(&line) {
                return Err(Error::InputAborted);
            }

            match line.parse::<Selection>() {
                Ok(Selection::Indices(indices)) if indices.iter().any(|&i| i >= catalog_len) => {
                    writeln!(self.output, "模板编号超出范围(1-{})，请重新输入", catalog_len)?;
                }
                Ok(selection) => return Ok(selection),
                Err(e) => {
                    debug!(input = %line, error = %e, "Unparseable selection");
                    writeln!(self.output, "输入格式有误，请重新输入")?;
                }
            }
        }
    }

    /// Ask for the article or link; blank answers ask again
    pub fn read_article(&mut self) -> Result<String> {
        loop {
            writeln!(self.output, "{}", ARTICLE_PROMPT)?;
            self.output.flush()?;

            match read_multiline(&mut self.input)? {
                Some(text) if !text.trim().is_empty() => return Ok(text),
                Some(_) => continue,
                None => return Err(Error::InputAborted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_multiline_stops_at_end_marker() {
        let mut input = Cursor::new("  第一行\n\n\t第二行\n/end\n不会读到\n");
        let text = read_multiline(&mut input).unwrap();
        assert_eq!(text.as_deref(), Some("第一行\n\n第二行"));
    }

    #[test]
    fn test_multiline_eof_ends_input() {
        let mut input = Cursor::new("只有一行");
        assert_eq!(read_multiline(&mut input).unwrap().as_deref(), Some("只有一行"));

        let mut empty = Cursor::new("");
        assert_eq!(read_multiline(&mut empty).unwrap(), None);
    }

    #[test]
    fn test_multiline_quit_aborts() {
        let mut input = Cursor::new("正文\n  QUIT \n");
        assert!(matches!(read_multiline(&mut input), Err(Error::InputAborted)));
    }

    #[test]
    fn test_invalid_bytes_are_dropped() {
        let mut input = Cursor::new(b"ab\xffcd\n/end\n".to_vec());
        assert_eq!(read_multiline(&mut input).unwrap().as_deref(), Some("abcd"));
    }

    #[test]
    fn test_selection_reprompts_until_valid() {
        let mut p = prompter("9\nx,y\n1,3\n");
        let selection = p.read_selection("(1:小A) (2:小B) (3:小C)", 3).unwrap();
        assert_eq!(selection, Selection::Indices(vec![0, 2]));

        let shown = String::from_utf8(p.output).unwrap();
        assert_eq!(shown.matches("请选择模板(1:小A)").count(), 3);
        assert!(shown.contains("超出范围(1-3)"));
    }

    #[test]
    fn test_selection_enter_means_all() {
        let mut p = prompter("\n");
        assert_eq!(p.read_selection("(1:小A)", 1).unwrap(), Selection::All);
    }

    #[test]
    fn test_article_skips_blank_answers() {
        let mut p = prompter("/end\n正文\n/end\n");
        assert_eq!(p.read_article().unwrap(), "正文");
    }

    #[test]
    fn test_article_at_eof_is_aborted() {
        let mut p = prompter("");
        assert!(matches!(p.read_article(), Err(Error::InputAborted)));
    }
}
