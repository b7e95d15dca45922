//! Indented C text writer.
//!
//! Mechanics worth knowing:
//! - closing braces are held back one line so `else` can attach to them
//! - a brace-less `if`/`for`/`while` indents exactly one following line
//! - lines ending in `:` (labels, cases) outdent by one
//! - preprocessor lines always land in column 0
//! - `#ifdef` regions with the same condition coalesce
//!
//! Output accumulates in memory; [`CodeWriter::finish`] writes stdout or
//! replaces the target file through a same-directory temp file, leaving
//! the target untouched when the content is unchanged.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::names::c_upper;

#[derive(Debug, Clone)]
pub enum DefineValue {
    Int(i128),
    Str(String),
}

pub struct CodeWriter {
    buf: String,
    nl_pending: bool,
    block_end_pending: bool,
    silent_block: bool,
    ind: usize,
    ifdef: Option<String>,
}

impl Default for CodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeWriter {
    pub fn new() -> CodeWriter {
        CodeWriter {
            buf: String::new(),
            nl_pending: false,
            block_end_pending: false,
            silent_block: false,
            ind: 0,
            ifdef: None,
        }
    }

    fn is_cond(line: &str) -> bool {
        line.starts_with("if") || line.starts_with("while") || line.starts_with("for")
    }

    fn raw(&mut self, ind: usize, line: &str) {
        for _ in 0..ind {
            self.buf.push('\t');
        }
        self.buf.push_str(line);
        self.buf.push('\n');
    }

    pub fn p(&mut self, line: &str) {
        self.p_ind(line, 0);
    }

    pub fn p_ind(&mut self, line: &str, add_ind: isize) {
        let mut line = line.to_string();
        if self.block_end_pending {
            self.block_end_pending = false;
            if line.starts_with("else") {
                line = format!("}} {}", line);
            } else {
                let ind = self.ind;
                self.raw(ind, "}");
            }
        }

        if self.nl_pending {
            self.buf.push('\n');
            self.nl_pending = false;
        }

        let mut ind = self.ind as isize;
        if line.ends_with(':') {
            ind -= 1;
        }
        if self.silent_block {
            ind += 1;
        }
        self.silent_block = line.ends_with(')') && Self::is_cond(&line);
        self.silent_block |= line.trim() == "else";
        if line.starts_with('#') {
            ind = 0;
        }
        ind += add_ind;
        self.raw(ind.max(0) as usize, &line);
    }

    pub fn nl(&mut self) {
        self.nl_pending = true;
    }

    pub fn block_start(&mut self, line: &str) {
        if line.is_empty() {
            self.p("{");
        } else {
            self.p(&format!("{} {{", line));
        }
        self.ind += 1;
    }

    pub fn block_end(&mut self, line: &str) {
        let mut line = line.to_string();
        if !line.is_empty() && !line.starts_with(';') && !line.starts_with(',') {
            line = format!(" {}", line);
        }
        self.ind -= 1;
        self.nl_pending = false;
        if line.is_empty() {
            // Delay the closing bracket in case "else" comes next.
            if self.block_end_pending {
                let ind = self.ind + 1;
                self.raw(ind, "}");
            }
            self.block_end_pending = true;
        } else {
            self.p(&format!("}}{}", line));
        }
    }

    pub fn write_doc_line(&mut self, doc: &str, indent: bool) {
        let mut line = String::from(" *");
        for word in doc.split_whitespace() {
            if line.len() + word.len() >= 79 {
                self.p(&line);
                line = String::from(" *");
                if indent {
                    line.push_str("  ");
                }
            }
            line.push(' ');
            line.push_str(word);
        }
        self.p(&line);
    }

    pub fn write_func_prot(
        &mut self,
        qual_ret: &str,
        name: &str,
        args: &[String],
        doc: Option<&str>,
        suffix: &str,
    ) {
        let void = vec!["void".to_string()];
        let args = if args.is_empty() { &void[..] } else { args };

        if let Some(doc) = doc {
            self.p("/*");
            self.p(&format!(" * {}", doc));
            self.p(" */");
        }

        let mut oneline = qual_ret.to_string();
        if !qual_ret.ends_with('*') {
            oneline.push(' ');
        }
        oneline.push_str(&format!("{}({}){}", name, args.join(", "), suffix));
        if oneline.len() < 80 {
            self.p(&oneline);
            return;
        }

        let mut v = qual_ret.to_string();
        if v.len() > 3 {
            self.p(&v);
            v = String::new();
        } else if !qual_ret.ends_with('*') {
            v.push(' ');
        }
        v.push_str(name);
        v.push('(');
        let ind: String = "\t".repeat(v.len() / 8) + &" ".repeat(v.len() % 8);
        let delta_ind = v.len() as isize - ind.len() as isize;
        v.push_str(&args[0]);
        for arg in &args[1..] {
            let mut next_len = (v.len() + arg.len()) as isize;
            if v.starts_with('\t') {
                next_len += delta_ind;
            }
            if next_len > 76 {
                self.p(&format!("{},", v));
                v = ind.clone();
            } else {
                v.push_str(", ");
            }
            v.push_str(arg);
        }
        self.p(&format!("{}){}", v, suffix));
    }

    pub fn write_func_lvar(&mut self, mut local_vars: Vec<String>) {
        if local_vars.is_empty() {
            return;
        }
        local_vars.sort_by_key(|v| std::cmp::Reverse(v.len()));
        for var in &local_vars {
            self.p(var);
        }
        self.nl();
    }

    pub fn write_func(
        &mut self,
        qual_ret: &str,
        name: &str,
        body: &[String],
        args: &[String],
        local_vars: Vec<String>,
    ) {
        self.write_func_prot(qual_ret, name, args, None, "");
        self.block_start("");
        self.write_func_lvar(local_vars);
        for line in body {
            self.p(line);
        }
        self.block_end("");
    }

    pub fn writes_defines(&mut self, defines: &[(String, DefineValue)]) {
        let longest = defines.iter().map(|d| d.0.len()).max().unwrap_or(0);
        let longest = ((longest + 8) / 8) * 8;
        for (name, value) in defines {
            let mut line = format!("#define {}", name);
            for _ in 0..(longest - name.len() + 7) / 8 {
                line.push('\t');
            }
            match value {
                DefineValue::Int(v) => line.push_str(&v.to_string()),
                DefineValue::Str(s) => line.push_str(&format!("\"{}\"", s)),
            }
            self.p(&line);
        }
    }

    pub fn write_struct_init(&mut self, members: &[(String, String)]) {
        let longest = members.iter().map(|m| m.0.len() + 1).max().unwrap_or(1);
        let longest = ((longest + 8) / 8) * 8;
        for (name, value) in members {
            let mut line = format!(".{}", name);
            for _ in 0..(longest - name.len() - 1 + 7) / 8 {
                line.push('\t');
            }
            line.push_str(&format!("= {},", value));
            self.p(&line);
        }
    }

    /// Open/continue/close a `#ifdef CONFIG_…` region; consecutive
    /// regions with the same condition share one block.
    pub fn ifdef_block(&mut self, config: Option<&str>) {
        let config_option = config.map(|c| format!("CONFIG_{}", c_upper(c)));
        if self.ifdef == config_option {
            return;
        }
        if let Some(prev) = self.ifdef.take() {
            self.p(&format!("#endif /* {} */", prev));
        }
        if let Some(opt) = &config_option {
            self.p(&format!("#ifdef {}", opt));
        }
        self.ifdef = config_option;
    }

    /// Flush any pending state and return the accumulated text.
    pub fn into_output(mut self) -> String {
        if self.block_end_pending {
            let ind = self.ind;
            self.raw(ind, "}");
            self.block_end_pending = false;
        }
        self.buf
    }

    /// Write the output to stdout or atomically into `out_file`. With
    /// `cmp_out`, an unchanged target file is left untouched.
    pub fn finish(self, out_file: Option<&Path>, cmp_out: bool) -> io::Result<()> {
        let output = self.into_output();
        let path = match out_file {
            None => {
                io::stdout().write_all(output.as_bytes())?;
                return Ok(());
            }
            Some(p) => p,
        };

        if cmp_out {
            if let Ok(existing) = fs::read(path) {
                if existing == output.as_bytes() {
                    return Ok(());
                }
            }
        }

        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(d) => tempfile::NamedTempFile::new_in(d)?,
            None => tempfile::NamedTempFile::new_in(".")?,
        };
        tmp.write_all(output.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn else_attaches_to_closing_brace() {
        let mut cw = CodeWriter::new();
        cw.block_start("if (a)");
        cw.p("x = 1;");
        cw.block_end("");
        cw.block_start("else");
        cw.p("x = 2;");
        cw.block_end("");
        assert_eq!(
            cw.into_output(),
            "if (a) {\n\tx = 1;\n} else {\n\tx = 2;\n}\n"
        );
    }

    #[test]
    fn braceless_if_indents_one_line() {
        let mut cw = CodeWriter::new();
        cw.p("if (err)");
        cw.p("return -1;");
        cw.p("done();");
        assert_eq!(cw.into_output(), "if (err)\n\treturn -1;\ndone();\n");
    }

    #[test]
    fn labels_outdent() {
        let mut cw = CodeWriter::new();
        cw.block_start("");
        cw.p("err_free:");
        cw.p("free(p);");
        cw.block_end("");
        assert_eq!(cw.into_output(), "{\nerr_free:\n\tfree(p);\n}\n");
    }

    #[test]
    fn pending_newlines_collapse() {
        let mut cw = CodeWriter::new();
        cw.p("a;");
        cw.nl();
        cw.nl();
        cw.p("b;");
        assert_eq!(cw.into_output(), "a;\n\nb;\n");
    }

    #[test]
    fn ifdef_blocks_coalesce() {
        let mut cw = CodeWriter::new();
        cw.ifdef_block(Some("net-foo"));
        cw.p("a;");
        cw.ifdef_block(Some("net-foo"));
        cw.p("b;");
        cw.ifdef_block(None);
        assert_eq!(
            cw.into_output(),
            "#ifdef CONFIG_NET_FOO\na;\nb;\n#endif /* CONFIG_NET_FOO */\n"
        );
    }

    #[test]
    fn long_prototypes_wrap_at_80_columns() {
        let mut cw = CodeWriter::new();
        let args: Vec<String> = vec![
            "struct ynl_sock *ys".into(),
            "struct some_very_long_request_type_name *req".into(),
            "unsigned int some_long_flag_argument".into(),
        ];
        cw.write_func_prot("int", "some_quite_long_generated_function_name", &args, None, ";");
        let out = cw.into_output();
        assert!(out.lines().count() > 1);
        for line in out.lines() {
            assert!(line.len() <= 80, "line too long: {}", line);
        }
    }

    #[test]
    fn defines_align_with_tabs() {
        let mut cw = CodeWriter::new();
        cw.writes_defines(&[
            ("SHORT".to_string(), DefineValue::Int(1)),
            ("A_MUCH_LONGER_NAME".to_string(), DefineValue::Str("v".to_string())),
        ]);
        let out = cw.into_output();
        assert!(out.contains("#define SHORT\t\t\t1\n"));
        assert!(out.contains("#define A_MUCH_LONGER_NAME\t\"v\"\n"));
    }

    #[test]
    fn cmp_out_leaves_identical_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h");

        let mut cw = CodeWriter::new();
        cw.p("int x;");
        cw.finish(Some(&path), true).unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut cw = CodeWriter::new();
        cw.p("int x;");
        cw.finish(Some(&path), true).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), mtime);

        let mut cw = CodeWriter::new();
        cw.p("int y;");
        cw.finish(Some(&path), true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "int y;\n");
    }
}
