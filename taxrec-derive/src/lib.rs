use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, LitStr, Meta, Token, Type};

/// Derive the CSV column layout of a record struct.
///
/// Every named field becomes a column. The column name honours `#[serde(rename = "...")]`,
/// fields marked `#[serde(skip)]` are left out, `Option<T>` fields are optional and the field's
/// doc comment becomes the column description.
///
/// Expands to `csv_schema() -> &'static [CsvField]` and `csv_header() -> String`. A `CsvField`
/// type with `name`, `required` and `description` fields must be in scope.
#[proc_macro_derive(CsvSchema, attributes(serde))]
pub fn derive_csv_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct Column {
    name: String,
    required: bool,
    description: String,
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "CsvSchema needs a struct with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "CsvSchema only supports structs")),
    };

    let mut columns = Vec::new();
    for field in fields {
        let attrs = SerdeAttrs::parse(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "unnamed field"))?;
        columns.push(Column {
            name: attrs.rename.unwrap_or_else(|| ident.to_string()),
            required: !is_option(&field.ty),
            description: doc_comment(&field.attrs),
        });
    }

    let entries = columns.iter().map(|c| {
        let Column {
            name,
            required,
            description,
        } = c;
        quote! {
            CsvField {
                name: #name,
                required: #required,
                description: #description,
            }
        }
    });
    let header = columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",");

    Ok(quote! {
        impl #name {
            pub fn csv_schema() -> &'static [CsvField] {
                static SCHEMA: &[CsvField] = &[#(#entries),*];
                SCHEMA
            }

            pub fn csv_header() -> String {
                #header.to_string()
            }
        }
    })
}

#[derive(Default)]
struct SerdeAttrs {
    rename: Option<String>,
    skip: bool,
}

impl SerdeAttrs {
    fn parse(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut parsed = SerdeAttrs::default();
        for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    parsed.skip = true;
                    return Ok(());
                }
                if meta.input.peek(Token![=]) {
                    let value: Lit = meta.value()?.parse()?;
                    if meta.path.is_ident("rename") {
                        if let Lit::Str(s) = value {
                            parsed.rename = Some(s.value());
                        }
                    }
                    return Ok(());
                }
                if meta.input.peek(syn::token::Paren) {
                    // e.g. rename(serialize = "..", deserialize = "..")
                    meta.parse_nested_meta(|inner| {
                        if inner.input.peek(Token![=]) {
                            let _: LitStr = inner.value()?.parse()?;
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            })?;
        }
        Ok(parsed)
    }
}

fn doc_comment(attrs: &[syn::Attribute]) -> String {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: Lit::Str(s), ..
                }) => Some(s.value().trim().to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_option(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Option"),
        _ => false,
    }
}
