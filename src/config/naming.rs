//! Naming conventions derived from configuration type names.

use heck::{ToSnakeCase, ToUpperCamelCase};
use regex_lite::Regex;
use std::sync::LazyLock;

/// Pattern that field and configuration names must match.
pub static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-zA-Z0-9_]*$").expect("name pattern is a valid regex")
});

/// Suffix stripped from type names before deriving prefixes.
pub const TYPE_SUFFIX: &str = "Configuration";

pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Snake-cased path for a type name, with `::` namespaces mapped to `/`.
///
/// `MyServiceConfiguration` becomes `my_service` and
/// `Billing::InvoiceConfiguration` becomes `billing/invoice`.
pub fn root_name(type_name: &str) -> String {
    let base = type_name.strip_suffix(TYPE_SUFFIX).unwrap_or(type_name);
    base.split("::")
        .filter(|part| !part.is_empty())
        .map(|part| part.to_snake_case())
        .collect::<Vec<_>>()
        .join("/")
}

/// Prefix for derived keys: the root name joined with `delimiter`, plus a
/// trailing `delimiter`, optionally upcased.
pub fn prefix(type_name: &str, delimiter: &str, upcase: bool) -> String {
    let prefix = format!("{}{}", root_name(type_name).replace('/', delimiter), delimiter);
    if upcase { prefix.to_uppercase() } else { prefix }
}

/// Type name a registry entry resolves to when none is given:
/// `billing` becomes `BillingConfiguration`.
pub fn default_type_name(name: &str) -> String {
    let namespaced = name
        .split('/')
        .map(|part| part.to_upper_camel_case())
        .collect::<Vec<_>>()
        .join("::");
    format!("{}{}", namespaced, TYPE_SUFFIX)
}
