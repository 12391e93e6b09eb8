//! Serial-number aliases loaded from a `serial=alias` text file.

use log::warn;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        AliasTable::default()
    }

    /// Parses `serial=alias` lines. Blank lines and lines starting with `#` are ignored;
    /// malformed lines are skipped with a warning.
    pub fn parse(contents: &str) -> Self {
        let mut aliases = HashMap::new();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((serial, alias)) if !serial.trim().is_empty() && !alias.trim().is_empty() => {
                    aliases.insert(serial.trim().to_string(), alias.trim().to_string());
                }
                _ => warn!("Ignoring malformed alias on line {}: {:?}", number + 1, line),
            }
        }
        AliasTable { aliases }
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(AliasTable::parse(&std::fs::read_to_string(path)?))
    }

    pub fn insert(&mut self, serial_number: impl Into<String>, alias: impl Into<String>) {
        self.aliases.insert(serial_number.into(), alias.into());
    }

    pub fn get(&self, serial_number: &str) -> Option<&str> {
        self.aliases.get(serial_number).map(String::as_str)
    }

    /// Alias if known, otherwise the serial number itself.
    pub fn directory_name<'a>(&'a self, serial_number: &'a str) -> &'a str {
        self.get(serial_number).unwrap_or(serial_number)
    }

    /// Alias for log lines.
    pub fn describe(&self, serial_number: &str) -> &str {
        self.get(serial_number).unwrap_or("alias not known")
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
