use proc_macro::TokenStream;
use quote::ToTokens;
use syn::{parse_macro_input, parse_quote, Block, ItemFn};

/// Installs the node's stdout tracing subscriber for the annotated test.
///
/// Output is only produced when `RUST_LOG` is set or the test runs with `--nocapture`, the test
/// body is wrapped in a span named after the test function.
#[proc_macro_attribute]
pub fn enable_logging(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut function = parse_macro_input!(item as ItemFn);

    let name = function.sig.ident.to_string();
    let stmts = function.block.stmts;
    let block: Block = parse_quote! {{
        let __logging_requested = ::std::env::var_os("RUST_LOG").is_some()
            || ::std::env::args().any(|arg| arg == "--nocapture");
        let __test_span = if __logging_requested {
            ::rollup_node_utils::logging::setup_test_tracing();
            Some(::tracing::info_span!(#name).entered())
        } else {
            None
        };

        #(#stmts)*
    }};
    function.block = Box::new(block);

    function.into_token_stream().into()
}
