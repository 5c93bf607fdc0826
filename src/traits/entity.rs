use crate::error::{DbKitError, Result};
use crate::types::{names_match, FromValue, Value};

type Setter<T> = Box<dyn Fn(&mut T, Value, &str) -> Result<()> + Send + Sync>;

struct Member<T> {
    name: String,
    setter: Setter<T>,
}

/// Static table of the settable members of an entity type.
///
/// Built once per type (usually inside a `OnceLock`) and consulted by name
/// when rows are mapped onto `T`.
pub struct EntityMap<T> {
    members: Vec<Member<T>>,
}

impl<T: 'static> EntityMap<T> {
    pub fn builder() -> EntityMapBuilder<T> {
        EntityMapBuilder {
            members: Vec::new(),
        }
    }

    /// Index of the member named `name`, compared case-insensitively.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| names_match(&m.name, name))
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Assign `value` to member `index` of `target`.
    /// `column` is only used to label conversion errors.
    pub(crate) fn assign(&self, index: usize, target: &mut T, value: Value, column: &str) -> Result<()> {
        (self.members[index].setter)(target, value, column)
    }
}

/// Builder for [`EntityMap`].
pub struct EntityMapBuilder<T> {
    members: Vec<Member<T>>,
}

impl<T: 'static> EntityMapBuilder<T> {
    /// Register a settable member.
    ///
    /// A NULL field assigns `V::default()`; any other value goes through
    /// [`FromValue`]. When two members share a name (ignoring case) the
    /// first registration wins.
    pub fn member<V, F>(mut self, name: &str, set: F) -> Self
    where
        V: FromValue + Default + 'static,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let setter: Setter<T> = Box::new(move |target, value, column| {
            let converted = if value.is_null() {
                V::default()
            } else {
                let found = value.type_name();
                V::from_value(value).ok_or_else(|| DbKitError::TypeMismatch {
                    column: column.to_string(),
                    expected: V::type_name(),
                    found,
                })?
            };
            set(target, converted);
            Ok(())
        });
        self.members.push(Member {
            name: name.to_string(),
            setter,
        });
        self
    }

    pub fn build(self) -> EntityMap<T> {
        EntityMap {
            members: self.members,
        }
    }
}

/// A type that rows can be materialized into.
///
/// # Example
/// ```
/// use std::sync::OnceLock;
/// use dbkit::{Entity, EntityMap};
///
/// #[derive(Default)]
/// struct User {
///     id: i64,
///     name: Option<String>,
/// }
///
/// impl Entity for User {
///     fn entity_map() -> &'static EntityMap<Self> {
///         static MAP: OnceLock<EntityMap<User>> = OnceLock::new();
///         MAP.get_or_init(|| {
///             EntityMap::builder()
///                 .member("id", |u: &mut User, v: i64| u.id = v)
///                 .member("name", |u: &mut User, v: Option<String>| u.name = v)
///                 .build()
///         })
///     }
/// }
/// ```
pub trait Entity: Default + Send + Sized + 'static {
    fn entity_map() -> &'static EntityMap<Self>;
}
