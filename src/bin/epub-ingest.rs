use std::env;
use std::process::ExitCode;

use epub_ingest::{
    parse_epub_with_options, read_entries, resolve_package, DirectorySink, EpubError,
    EpubParseResult, MemorySink, Package, ParseOptionsBuilder, ParseStats,
};

#[derive(Clone, Debug)]
enum Json {
    Bool(bool),
    Num(usize),
    Str(String),
    Arr(Vec<Json>),
    Obj(Vec<(String, Json)>),
}

impl Json {
    fn render(&self, pretty: bool) -> String {
        let mut out = String::new();
        self.write_into(&mut out, pretty, 0);
        out
    }

    fn write_into(&self, out: &mut String, pretty: bool, depth: usize) {
        match self {
            Json::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Json::Num(v) => out.push_str(&v.to_string()),
            Json::Str(v) => write_json_string(out, v),
            Json::Arr(items) => {
                out.push('[');
                if !items.is_empty() && pretty {
                    out.push('\n');
                }
                for (idx, item) in items.iter().enumerate() {
                    if pretty {
                        write_indent(out, depth + 1);
                    }
                    item.write_into(out, pretty, depth + 1);
                    if idx + 1 != items.len() {
                        out.push(',');
                    }
                    if pretty {
                        out.push('\n');
                    }
                }
                if !items.is_empty() && pretty {
                    write_indent(out, depth);
                }
                out.push(']');
            }
            Json::Obj(fields) => {
                out.push('{');
                if !fields.is_empty() && pretty {
                    out.push('\n');
                }
                for (idx, (key, value)) in fields.iter().enumerate() {
                    if pretty {
                        write_indent(out, depth + 1);
                    }
                    write_json_string(out, key);
                    out.push(':');
                    if pretty {
                        out.push(' ');
                    }
                    value.write_into(out, pretty, depth + 1);
                    if idx + 1 != fields.len() {
                        out.push(',');
                    }
                    if pretty {
                        out.push('\n');
                    }
                }
                if !fields.is_empty() && pretty {
                    write_indent(out, depth);
                }
                out.push('}');
            }
        }
    }
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c <= '\u{1f}' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let mut rest = args.into_iter().skip(1).collect::<Vec<_>>();
    let pretty = pop_flag(&mut rest, "--pretty");

    if rest.is_empty() || rest[0] == "--help" || rest[0] == "-h" {
        print_help();
        return Ok(());
    }

    let cmd = rest.remove(0);
    match cmd.as_str() {
        "entries" => {
            let path = first_arg(&rest, "entries requires <epub_path>")?;
            let bytes = read_file(&path)?;
            let entries = read_entries(&bytes).map_err(|e| display_err(e.into()))?;
            let items = entries
                .iter()
                .map(|(name, data)| {
                    Json::Obj(vec![
                        ("path".to_string(), Json::Str(name.to_string())),
                        ("size".to_string(), Json::Num(data.len())),
                    ])
                })
                .collect::<Vec<_>>();
            let output = Json::Obj(vec![
                ("epub".to_string(), Json::Str(path)),
                ("count".to_string(), Json::Num(items.len())),
                ("skipped".to_string(), Json::Num(entries.skipped_entries())),
                ("entries".to_string(), Json::Arr(items)),
            ]);
            println!("{}", output.render(pretty));
        }
        "package" => {
            let path = first_arg(&rest, "package requires <epub_path>")?;
            let bytes = read_file(&path)?;
            let entries = read_entries(&bytes).map_err(|e| display_err(e.into()))?;
            let package = resolve_package(&entries).map_err(display_err)?;
            let output = Json::Obj(vec![
                ("epub".to_string(), Json::Str(path)),
                ("package".to_string(), package_json(&package)),
            ]);
            println!("{}", output.render(pretty));
        }
        "parse" => {
            let mut args = rest;
            let keep_image_only = pop_flag(&mut args, "--keep-image-only");
            let assets = pop_value(&mut args, "--assets")?;
            let owner = pop_value(&mut args, "--owner")?.unwrap_or_else(|| "local".to_string());
            let path = first_arg(&args, "parse requires <epub_path>")?;
            let bytes = read_file(&path)?;

            let mut builder = ParseOptionsBuilder::new();
            if keep_image_only {
                builder = builder.keep_image_only_chapters();
            }
            let options = builder.build();

            let (result, stored) = match assets {
                Some(dir) => {
                    let mut sink = DirectorySink::new(dir, owner);
                    let result =
                        parse_epub_with_options(&bytes, &mut sink, &options).map_err(display_err)?;
                    let stored = result.stats.images_stored;
                    (result, stored)
                }
                None => {
                    let mut sink = MemorySink::new("memory:");
                    let result =
                        parse_epub_with_options(&bytes, &mut sink, &options).map_err(display_err)?;
                    (result, sink.len())
                }
            };

            let output = Json::Obj(vec![
                ("epub".to_string(), Json::Str(path)),
                ("assets_stored".to_string(), Json::Num(stored)),
                ("result".to_string(), result_json(&result)),
            ]);
            println!("{}", output.render(pretty));
        }
        _ => {
            return Err(format!("unknown command '{}', try --help", cmd));
        }
    }

    Ok(())
}

fn read_file(path: &str) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| display_err(EpubError::Io(e.to_string())))
}

fn first_arg(args: &[String], msg: &str) -> Result<String, String> {
    args.first().cloned().ok_or_else(|| msg.to_string())
}

fn pop_flag(args: &mut Vec<String>, flag: &str) -> bool {
    if let Some(pos) = args.iter().position(|a| a == flag) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn pop_value(args: &mut Vec<String>, flag: &str) -> Result<Option<String>, String> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn package_json(package: &Package) -> Json {
    let manifest = package
        .manifest
        .iter()
        .map(|item| {
            Json::Obj(vec![
                ("id".to_string(), Json::Str(item.id.clone())),
                ("href".to_string(), Json::Str(item.href.clone())),
                ("media_type".to_string(), Json::Str(item.media_type.clone())),
            ])
        })
        .collect();
    let spine = package
        .spine
        .iter()
        .enumerate()
        .map(|(index, item)| {
            Json::Obj(vec![
                ("index".to_string(), Json::Num(index)),
                ("idref".to_string(), Json::Str(item.idref.clone())),
                ("linear".to_string(), Json::Bool(item.linear)),
            ])
        })
        .collect();
    Json::Obj(vec![
        ("path".to_string(), Json::Str(package.package_path.clone())),
        ("dir".to_string(), Json::Str(package.package_dir.clone())),
        ("manifest".to_string(), Json::Arr(manifest)),
        ("spine".to_string(), Json::Arr(spine)),
    ])
}

fn result_json(result: &EpubParseResult) -> Json {
    let chapters = result
        .chapters
        .iter()
        .map(|chapter| {
            Json::Obj(vec![
                ("index".to_string(), Json::Num(chapter.index)),
                ("href".to_string(), Json::Str(chapter.href.clone())),
                ("char_length".to_string(), Json::Num(chapter.char_length)),
                ("char_offset".to_string(), Json::Num(chapter.char_offset)),
                ("html_bytes".to_string(), Json::Num(chapter.html.len())),
            ])
        })
        .collect();
    Json::Obj(vec![
        ("chapters".to_string(), Json::Arr(chapters)),
        (
            "total_characters".to_string(),
            Json::Num(result.total_characters),
        ),
        ("styles_bytes".to_string(), Json::Num(result.styles.len())),
        ("stats".to_string(), stats_json(&result.stats)),
    ])
}

fn stats_json(stats: &ParseStats) -> Json {
    Json::Obj(vec![
        ("skipped_entries".to_string(), Json::Num(stats.skipped_entries)),
        ("dangling_idrefs".to_string(), Json::Num(stats.dangling_idrefs)),
        ("missing_chapters".to_string(), Json::Num(stats.missing_chapters)),
        (
            "dropped_empty_chapters".to_string(),
            Json::Num(stats.dropped_empty_chapters),
        ),
        ("missing_styles".to_string(), Json::Num(stats.missing_styles)),
        (
            "image_placeholders".to_string(),
            Json::Num(stats.image_placeholders),
        ),
        ("images_stored".to_string(), Json::Num(stats.images_stored)),
    ])
}

fn display_err(err: EpubError) -> String {
    err.to_string()
}

fn print_help() {
    let help = r#"epub-ingest - turn EPUB files into reading-order chapters

USAGE:
  epub-ingest [--pretty] <command> [args...]

COMMANDS:
  entries <epub_path>
  package <epub_path>
  parse <epub_path> [--assets <dir>] [--owner <name>] [--keep-image-only]

NOTES:
  - Output is JSON.
  - `parse --assets` writes images to <dir>/<owner>/ (owner defaults to "local").
  - Without --assets images are kept in memory and only counted.
"#;
    println!("{}", help);
}
