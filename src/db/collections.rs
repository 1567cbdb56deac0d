use std::fmt;

/// Logical collections of the local store, named the way the upload queue names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Pages,
    Visits,
    Bookmarks,
    Annotations,
    AnnotationPrivacyLevels,
    SharedAnnotationMetadata,
    CustomLists,
    PageListEntries,
    SharedListMetadata,
    Tags,
    Settings,
    Templates,
    FavIcons,
}

impl Collection {
    /// Parents before dependents, so a replay of the queue never sees a row before its parent.
    pub const DEPENDENCY_ORDER: [Collection; 12] = [
        Collection::Pages,
        Collection::Visits,
        Collection::Bookmarks,
        Collection::Annotations,
        Collection::AnnotationPrivacyLevels,
        Collection::SharedAnnotationMetadata,
        Collection::CustomLists,
        Collection::PageListEntries,
        Collection::SharedListMetadata,
        Collection::Tags,
        Collection::Settings,
        Collection::Templates,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Visits => "visits",
            Self::Bookmarks => "bookmarks",
            Self::Annotations => "annotations",
            Self::AnnotationPrivacyLevels => "annotationPrivacyLevels",
            Self::SharedAnnotationMetadata => "sharedAnnotationMetadata",
            Self::CustomLists => "customLists",
            Self::PageListEntries => "pageListEntries",
            Self::SharedListMetadata => "sharedListMetadata",
            Self::Tags => "tags",
            Self::Settings => "settings",
            Self::Templates => "templates",
            Self::FavIcons => "favIcons",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Visits => "visits",
            Self::Bookmarks => "bookmarks",
            Self::Annotations => "annotations",
            Self::AnnotationPrivacyLevels => "annotation_privacy_levels",
            Self::SharedAnnotationMetadata => "shared_annotation_metadata",
            Self::CustomLists => "custom_lists",
            Self::PageListEntries => "page_list_entries",
            Self::SharedListMetadata => "shared_list_metadata",
            Self::Tags => "tags",
            Self::Settings => "settings",
            Self::Templates => "templates",
            Self::FavIcons => "fav_icons",
        }
    }

    pub fn all() -> impl Iterator<Item = Collection> {
        Self::DEPENDENCY_ORDER
            .into_iter()
            .chain(std::iter::once(Collection::FavIcons))
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
