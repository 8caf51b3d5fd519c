use crate::error::{ErrorDetail, ErrorEntry, ErrorSource};
use crate::logic::path::parse_error_path;
use crate::model::{humanize, FieldError, RootRef, Scope, ScopeKind, StoragePath, ValidationFailure};

/// Projects store validation errors, keyed by positional storage paths, back
/// onto the paths the client sent
pub struct ErrorPathTranslator<'a> {
    scopes: &'a [Scope],
}

impl<'a> ErrorPathTranslator<'a> {
    pub fn new(scopes: &'a [Scope]) -> Self {
        Self { scopes }
    }

    pub fn translate(&self, failures: &[ValidationFailure]) -> Vec<ErrorEntry> {
        failures
            .iter()
            .flat_map(|failure| {
                failure
                    .errors
                    .iter()
                    .map(move |error| self.translate_field(&failure.root, error))
            })
            .collect()
    }

    fn find_scope(&self, storage_path: &StoragePath) -> Option<&Scope> {
        self.scopes.iter().find(|scope| {
            scope.kind != ScopeKind::Show && scope.storage_path.as_ref() == Some(storage_path)
        })
    }

    pub fn translate_field(&self, root: &RootRef, error: &FieldError) -> ErrorEntry {
        let info = parse_error_path(&error.key);
        let storage_path = StoragePath {
            root: root.clone(),
            path: info.path.clone().unwrap_or_default(),
        };
        let detail = ErrorDetail::from_messages(error.messages.clone());
        let joined = error.messages.join(", ");

        match self.find_scope(&storage_path) {
            Some(scope) => {
                let client_path = format!("{}.{}", scope.client_path, info.field);
                // errorPath override > client path > storage path
                let pointer = match &scope.error_path {
                    Some(error_path) => format!("{}.{}", error_path, info.field),
                    None => client_path.clone(),
                };
                ErrorEntry {
                    title: format!("{} {}", humanize(&info.field), joined),
                    detail,
                    source: ErrorSource {
                        pointer: Some(pointer),
                        client_path: Some(client_path),
                        storage_path: Some(error.key.clone()),
                    },
                }
            }
            None => ErrorEntry {
                title: joined,
                detail,
                source: ErrorSource {
                    pointer: None,
                    client_path: None,
                    storage_path: Some(error.key.clone()),
                },
            },
        }
    }
}
