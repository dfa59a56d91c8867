//! Reading and writing of `PhonSym` files.
//!
//! Results are stored as `bincode` binaries whose extension records their content, and the
//! binary reads its configuration from YAML.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{self, Context};
use bincode;
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml;

pub(crate) mod format;
pub mod qe_dyn;


/// The kinds of binary files written by `PhonSym`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhonSymFileType {
    /// A [`crate::phonons::DynamicalMatrixSet`].
    Dyn,

    /// An $`\Upsilon`$ matrix.
    Ups,
}

impl PhonSymFileType {
    /// The extension appended to file names, without the leading dot.
    pub fn ext(&self) -> String {
        match self {
            PhonSymFileType::Dyn => "phonsym.dyn".to_string(),
            PhonSymFileType::Ups => "phonsym.ups".to_string(),
        }
    }

    /// The path of the file of this kind with a given base name.
    pub fn path<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        let mut path = name.as_ref().as_os_str().to_owned();
        path.push(".");
        path.push(self.ext());
        PathBuf::from(path)
    }
}

/// Loads a value from the binary file `{name}.{ext}`.
///
/// # Errors
///
/// Errors if the file cannot be opened or does not hold a value of type `T`.
pub fn read_phonsym_binary<T, P>(name: P, file_type: PhonSymFileType) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = file_type.path(name);
    let file = File::open(&path).with_context(|| format!("Unable to open `{}`", path.display()))?;
    bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("Unable to decode `{}`", path.display()))
}

/// Stores a value in the binary file `{name}.{ext}`, replacing any existing file.
///
/// # Errors
///
/// Errors if the file cannot be created or written.
pub fn write_phonsym_binary<T, P>(
    name: P,
    file_type: PhonSymFileType,
    value: &T,
) -> Result<(), anyhow::Error>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = file_type.path(name);
    let file =
        File::create(&path).with_context(|| format!("Unable to create `{}`", path.display()))?;
    bincode::serialize_into(BufWriter::new(file), value)
        .with_context(|| format!("Unable to encode `{}`", path.display()))
}

/// Parses a YAML file, whose path is taken as given.
///
/// # Errors
///
/// Errors if the file cannot be opened or does not describe a value of type `T`.
pub fn read_phonsym_yaml<T, P>(path: P) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Unable to open `{}`", path.display()))?;
    serde_yaml::from_reader(BufReader::new(file))
        .with_context(|| format!("Unable to parse `{}`", path.display()))
}
