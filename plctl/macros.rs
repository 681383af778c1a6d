//! Declarative macros to reduce boilerplate across the plctl codebase

/// Define a numbered menu enum with `number()`, `label()`, `all()` and
/// `from_number()` implementations
///
/// # Example
/// ```
/// use plctl::menu_enum;
///
/// menu_enum! {
///     pub enum Direction {
///         Up = 1 => "Move up",
///         Down = 2 => "Move down",
///     }
/// }
///
/// assert_eq!(Direction::from_number(2), Some(Direction::Down));
/// assert_eq!(Direction::Up.label(), "Move up");
/// assert_eq!(Direction::menu_line(), "1) Move up  2) Move down");
/// ```
///
/// Expands to:
/// - An enum with Debug, Clone, Copy, PartialEq, Eq, Hash derives
/// - `number(&self) -> u32` and `label(&self) -> &'static str`
/// - `all() -> Vec<Self>` and `from_number(u32) -> Option<Self>`
/// - `menu_line() -> String`, the one-line form used in prompts
#[macro_export]
macro_rules! menu_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $num:literal => $label:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn number(&self) -> u32 {
                match self {
                    $($name::$variant => $num,)*
                }
            }

            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }

            pub fn from_number(number: u32) -> Option<$name> {
                match number {
                    $($num => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn menu_line() -> String {
                $name::all()
                    .iter()
                    .map(|item| format!("{}) {}", item.number(), item.label()))
                    .collect::<Vec<_>>()
                    .join("  ")
            }
        }
    };
}
