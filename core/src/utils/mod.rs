pub mod knowledge;
pub mod monitor;
pub mod probes;

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::path::Path;

/// Reads a file line-by-line, returning all non-empty trimmed lines.
pub fn read_lines(path: &str) -> io::Result<Vec<String>> {
    let file = File::open(Path::new(path))?;
    let reader = io::BufReader::new(file);
    let lines = reader
        .lines()
        .filter_map(|line| {
            let line = line.ok()?;
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .collect();
    Ok(lines)
}
