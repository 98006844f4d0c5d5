//! Query construction
//!
//! A search request becomes a `BuiltQuery`, a backend-neutral IR, which the
//! `render` module turns into a document-store DSL request, a SQL statement
//! or an in-process evaluation plan.

mod builder;
mod highlight;
mod ir;
mod matcher;
mod mode;
pub mod render;

pub use builder::{target_vector_field, BuilderSettings, QueryBuilder};
pub use highlight::{
    extract_regex_terms, render_fragments, HighlightDirective, HighlightSource, Highlighter,
};
pub use ir::{BuiltQuery, Constraint, LexicalQuery, QualityBoost, QueryIr, TextField, VectorQuery};
pub use matcher::{LexicalMatcher, MatchSpan};
pub use mode::{Filters, Granularity, ModeSpec, Ordering, SearchMode, SearchOptions, SortField};
pub use render::{Backend, RenderSettings, RenderedQuery, Renderer};
