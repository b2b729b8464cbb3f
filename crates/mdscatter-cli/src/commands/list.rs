use crate::error::Result;
use mdscatter::engine::Engine;
use mdscatter::workflows;
use std::io::{self, Write};

pub fn run() -> Result<()> {
    let engine = workflows::default_engine()?;
    let stdout = io::stdout();
    write_listing(&engine, &mut stdout.lock())?;
    Ok(())
}

fn write_listing(engine: &Engine, out: &mut impl Write) -> io::Result<()> {
    let jobs = engine.jobs();
    for family in jobs.subclasses() {
        writeln!(out, "{family}")?;
        for job in jobs.children(family) {
            writeln!(out, "  {job}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_are_listed_under_their_family() {
        let engine = workflows::default_engine().unwrap();
        let mut out = Vec::new();
        write_listing(&engine, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], workflows::SCATTERING);
        assert!(lines.iter().filter(|l| !l.starts_with(' ')).count() == 4);
        assert_eq!(lines.iter().filter(|l| l.starts_with("  ")).count(), 9);
    }
}
