//! Interactive driver for multi-attribute linear-hashed relations: create or
//! open a relation, insert tuples, and run partial-match queries from a
//! stdin REPL. Deliberately thin — no argument parsing crate, no output
//! formatting beyond plain lines — since it's a manual-use convenience
//! around the library, not a command language of its own.

use std::io::{stdin, stdout, Write};

use linhash::{Mode, Relation, RelationConfig};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn main() -> Result<()> {
    let mut rel: Option<Relation> = None;

    let stdin = stdin();
    let mut stdout = stdout();

    let mut input = String::new();
    loop {
        stdout.write_all(b"(linhash) ")?;
        stdout.flush()?;

        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            writeln!(stdout)?;
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if let Err(e) = run_command(line, &mut rel) {
            writeln!(stdout, "error: {e}")?;
        }
    }

    if let Some(r) = rel.take() {
        r.close()?;
    }
    Ok(())
}

fn run_command(line: &str, rel: &mut Option<Relation>) -> Result<()> {
    let mut stdout = stdout();
    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match cmd {
        "create" => {
            // create <name> <nattrs> <depth> <chvec>
            let mut args = rest.splitn(4, char::is_whitespace);
            let name = args.next().ok_or("usage: create <name> <nattrs> <depth> <chvec>")?;
            let nattrs: u32 = args.next().ok_or("missing nattrs")?.parse()?;
            let depth: u32 = args.next().ok_or("missing depth")?.parse()?;
            let chvec = args.next().unwrap_or("").to_string();
            let config = RelationConfig { nattrs, depth, choice_vector: chvec, split_divisor: 10 };
            *rel = Some(Relation::create(name, config)?);
            writeln!(stdout, "created '{name}'")?;
        }
        "open" => {
            // open <name> [ro]
            let mut args = rest.split_whitespace();
            let name = args.next().ok_or("usage: open <name> [ro]")?;
            let mode = if args.next() == Some("ro") { Mode::Read } else { Mode::Write };
            *rel = Some(Relation::open(name, mode)?);
            writeln!(stdout, "opened '{name}'")?;
        }
        "insert" => {
            let r = rel.as_mut().ok_or("no relation open")?;
            let p = r.insert(rest)?;
            writeln!(stdout, "inserted into bucket {p}")?;
        }
        "select" => {
            let r = rel.as_ref().ok_or("no relation open")?;
            let fields: Vec<&str> = rest.split(',').collect();
            let pattern: Vec<Option<&[u8]>> =
                fields.iter().map(|f| if *f == "?" { None } else { Some(f.as_bytes()) }).collect();
            let query = linhash::Query::start(r, &pattern)?;
            let mut n = 0;
            for tuple in query {
                let tuple = tuple?;
                writeln!(stdout, "{}", String::from_utf8_lossy(&tuple))?;
                n += 1;
            }
            writeln!(stdout, "({n} tuples)")?;
        }
        "stats" => {
            let r = rel.as_ref().ok_or("no relation open")?;
            let stats = r.stats()?;
            writeln!(
                stdout,
                "#attrs:{}  #pages:{}  #tuples:{}  d:{}  sp:{}",
                stats.nattrs, stats.npages, stats.ntuples, stats.depth, stats.sp
            )?;
            let cv: Vec<String> =
                r.choice_vector().items().iter().map(|it| format!("{}:{}", it.att, it.bit)).collect();
            writeln!(stdout, "cv: {}", cv.join(","))?;
            for bucket in &stats.buckets {
                write!(stdout, "[{:2}]  ", bucket.bucket)?;
                for (i, page) in bucket.chain.iter().enumerate() {
                    if i > 0 {
                        write!(stdout, " -> ")?;
                    }
                    write!(stdout, "({},{},{},{})", page.page_id, page.ntuples, page.free_bytes, page.ovflow)?;
                }
                writeln!(stdout)?;
            }
        }
        "close" => {
            if let Some(r) = rel.take() {
                r.close()?;
            }
            writeln!(stdout, "closed")?;
        }
        "quit" | "exit" => std::process::exit(0),
        other => {
            writeln!(
                stdout,
                "unknown command '{other}' (try: create, open, insert, select, stats, close, quit)"
            )?;
        }
    }
    Ok(())
}
