//! Parsed `.hcl` sources before they are interpreted as documents
//!
//! Root blocks and root attributes are numbered across all sources in insertion order and remember the source they
//! came from. Issues found later refer to these numbers.
use hcl_edit::structure::{Attribute, Block, Body, Structure};
use std::path::{Path, PathBuf};

#[derive(Default, Debug)]
pub struct HclDocuments {
    sources: Vec<Source>,
    root_attributes: Vec<(usize, Attribute)>,
    root_blocks: Vec<(usize, Block)>,
}

impl HclDocuments {
    /// Inserts and indexes an hcl document
    pub fn insert(&mut self, document: Body, path: impl Into<Option<PathBuf>>) {
        let source_index = self.sources.len();
        self.sources.push(path.into());

        for structure in document.into_iter() {
            match structure {
                Structure::Block(block) => self.root_blocks.push((source_index, block)),
                Structure::Attribute(attribute) => {
                    self.root_attributes.push((source_index, attribute))
                }
            }
        }
    }

    /// Root attributes with their index and the index of their source
    pub fn attributes(&self) -> impl Iterator<Item = SourceAttribute> {
        self.root_attributes
            .iter()
            .enumerate()
            .map(|(index, (source_index, attribute))| (index, *source_index, attribute))
    }

    /// Root blocks with their index and the index of their source
    pub fn blocks(&self) -> impl Iterator<Item = SourceBlock> {
        self.root_blocks
            .iter()
            .enumerate()
            .map(|(index, (source_index, block))| (index, *source_index, block))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Printable location of a source: its path, or `inline-N` for documents without one
    pub fn location(&self, source_index: usize) -> String {
        match self.sources.get(source_index) {
            Some(Some(path)) => path.display().to_string(),
            _ => format!("inline-{source_index}"),
        }
    }
}

impl HclDocuments {
    pub fn load_file(&mut self, file_path: &Path) -> Result<(), LoadError> {
        let io_error = |source| LoadError::Io {
            path: file_path.to_path_buf(),
            source,
        };
        let file_path = file_path.canonicalize().map_err(io_error)?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path).map_err(io_error)?;
        let body = hcl_edit::parser::parse_body(&file_contents).map_err(|source| LoadError::Parse {
            path: file_path.clone(),
            source,
        })?;

        self.insert(body, Some(file_path));
        Ok(())
    }

    /// Loads every `*.hcl` file of a directory in file name order
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let io_error = |source| LoadError::Io {
            path: dir_path.to_path_buf(),
            source,
        };

        let mut file_paths = vec![];
        for dir_entry in std::fs::read_dir(dir_path).map_err(io_error)? {
            let dir_entry = dir_entry.map_err(io_error)?;
            let path = dir_entry.path();
            if path.is_file() && path.extension().is_some_and(|extension| extension == "hcl") {
                file_paths.push(path);
            }
        }

        if file_paths.is_empty() {
            return Err(LoadError::NoFilesFound(dir_path.to_path_buf()));
        }

        file_paths.sort();
        file_paths
            .iter()
            .try_for_each(|file_path| self.load_file(file_path))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("no .hcl files in {}", .0.display())]
    NoFilesFound(PathBuf),
    #[error("unable to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: hcl_edit::parser::Error,
    },
}

impl From<Body> for HclDocuments {
    fn from(value: Body) -> Self {
        let mut tree = HclDocuments::default();
        tree.insert(value, None);
        tree
    }
}

/// Utility macro to create [HclDocuments]
///
/// Create from a single document
/// ```
/// # use confres::hcl_documents;
/// hcl_documents!("host one {}");
/// ```
///
/// Create from multiple documents (path required)
/// ```
/// # use confres::hcl_documents;
/// hcl_documents! {
///   "one.hcl" => "host one {}",
///   "two.hcl" => "host two {}"
/// };
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use confres::hcl_documents;
/// hcl_documents!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! hcl_documents {
    // single document without source
    { $expr:expr } => {
        $crate::hcl_documents::HclDocuments::from(hcl_edit::parser::parse_body($expr).expect("body must parse"))
    };
    // multi document with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut docs = $crate::hcl_documents::HclDocuments::default();
        $(
            docs.insert(hcl_edit::parser::parse_body($expr).expect("body must parse"), Some($source.into()));
        )+

        docs
    }};
}

pub type Source = Option<PathBuf>;
pub type SourceAttribute<'a> = (usize, usize, &'a Attribute);
pub type SourceBlock<'a> = (usize, usize, &'a Block);
