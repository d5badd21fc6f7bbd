//! # confres - hierarchical configuration resolution
//!
//! ## Introduction for developers
//!
//! Read this to understand how `confres` works internally.
//!
//! ### Loading files
//!
//! `.hcl` documents are parsed into [hcl_documents::HclDocuments], which keeps every root block together with the
//! path it came from. [document::Documents::new] then interprets the root blocks:
//!
//! ```hcl
//! variable "port" { value = "8080" }
//!
//! schema "com.example.host" {
//!   alias   = "host"
//!   factory = true
//!   attribute "port" {
//!     type    = "integer"
//!     default = "${port}"
//!   }
//! }
//!
//! host "one" {
//!   port = 9090
//! }
//! ```
//!
//! Every file becomes one [document::Document]: the configuration elements ([element::ConfigElement]) and variables
//! it contributes. Schema blocks become a [schema::SchemaSource] per file.
//!
//! ### Merging
//!
//! Documents are added to (and removed from) an immutable [store::ConfigurationStore]. Elements written with the same
//! node name (and id) are folded in the order their documents were added, according to each contribution's
//! [element::MergeBehavior]. Removing a document gives back the store it was added to.
//!
//! ### Schemas
//!
//! [schema::SchemaRegistry] holds the registered types. Types may extend another type, in which case they inherit its
//! attributes once the whole `extends` chain is registered. Registration returns a successor registry.
//! [schema::SharedSchemaRegistry] publishes successors atomically so evaluations can work on a stable snapshot.
//!
//! ### Evaluation
//!
//! [evaluator::ConfigEvaluator] turns one merged element into an [evaluator::EvaluationResult]:
//!
//! - `${...}` is substituted from variables ([variables::VariableRegistry]) and other attributes, see [expression]
//! - values are converted to the declared type and cardinality
//! - references resolve to the pids of the elements they point at
//! - nested elements get an identity ([config_id::ConfigId]) below their parent and are evaluated as well
//!
//! ### Comparison
//!
//! [comparator::ConfigComparator] computes added, removed and modified configurations (and variables) between two
//! stores.
//!
pub mod comparator;
pub mod config_id;
pub mod document;
pub mod element;
pub mod evaluator;
pub mod expression;
pub mod hcl_documents;
pub mod nester;
pub mod schema;
pub mod store;
mod util;
pub mod value;
pub mod variables;

pub use util::{escape, parse_list};
