//! Strongly typed accessors over a [`Configuration`](crate::Configuration).

/// Declare a newtype over `Arc<Configuration>` with one typed method per field.
///
/// Each method reads the field by name and extracts it with
/// [`FromValue`](crate::FromValue), so a field declared as `integer` is read
/// back as `i64`, `boolean` as `bool`, and so on. A type mismatch reads as
/// `None`.
///
/// ```
/// use layered_settings::{ConfigType, Configuration, FieldOptions, FieldType, settings_accessors};
/// use std::sync::Arc;
///
/// settings_accessors! {
///     pub struct MyService {
///         host: String,
///         port: i64,
///     }
/// }
///
/// let ty = ConfigType::inherit(&ConfigType::new_base(), "MyServiceConfiguration");
/// ty.field("host", FieldOptions::new().default("localhost")).unwrap();
/// ty.field("port", FieldOptions::new().of_type(FieldType::Integer).default(80)).unwrap();
///
/// let settings = MyService::new(Arc::new(Configuration::new(ty)));
/// assert_eq!(settings.port().unwrap(), Some(80));
/// ```
#[macro_export]
macro_rules! settings_accessors {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name(::std::sync::Arc<$crate::Configuration>);

        impl $name {
            pub fn new(config: ::std::sync::Arc<$crate::Configuration>) -> Self {
                Self(config)
            }

            pub fn configuration(&self) -> &::std::sync::Arc<$crate::Configuration> {
                &self.0
            }

            $(
                pub fn $field(&self) -> $crate::SettingsResult<::std::option::Option<$ty>> {
                    self.0.get_as::<$ty>(stringify!($field))
                }
            )*
        }
    };
}
