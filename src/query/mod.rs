//! Query compilation and execution for Docket
//!
//! Plans built with `docket_query` are compiled into native store documents
//! here, then run against a store through a [`CollectionAdapter`].

mod adapter;
mod compile;

pub use adapter::{AdapterError, AdapterResult, CollectionAdapter, Page};
pub use compile::{
    compile, compile_pagination, compile_patch, compile_pipeline, compile_sort, CompileError,
    NativeFilter, NativeFindOptions, NativePipeline, NativeSort, NativeUpdate,
};
