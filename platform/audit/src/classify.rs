use http::Method;

use crate::EventKind;

enum PathMatch {
    Exact(&'static [&'static str]),
    Prefix(&'static str),
}

enum Methods {
    Any,
    Only(&'static [&'static str]),
}

struct Rule {
    path: PathMatch,
    methods: Methods,
    kind: EventKind,
}

const WRITE_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

// Scanned top to bottom, first match wins.
const RULES: &[Rule] = &[
    Rule {
        path: PathMatch::Exact(&["/auth/login/"]),
        methods: Methods::Any,
        kind: EventKind::UserLogin,
    },
    Rule {
        path: PathMatch::Exact(&["/ocr/"]),
        methods: Methods::Only(&["POST"]),
        kind: EventKind::OcrUploaded,
    },
    Rule {
        path: PathMatch::Exact(&[
            "/dashboard/recent-features/",
            "//dashboard/recent-features/",
        ]),
        methods: Methods::Only(&["GET"]),
        kind: EventKind::DashboardViewed,
    },
    Rule {
        path: PathMatch::Exact(&["/save-to-database/create/"]),
        methods: Methods::Only(&["POST"]),
        kind: EventKind::DatasetSaved,
    },
    Rule {
        path: PathMatch::Prefix("/api/v1/comments/"),
        methods: Methods::Only(WRITE_METHODS),
        kind: EventKind::AnnotationUpdated,
    },
    Rule {
        path: PathMatch::Prefix("/api/v1/annotations/"),
        methods: Methods::Any,
        kind: EventKind::FeatureUsed,
    },
    Rule {
        path: PathMatch::Prefix("/api/v1/documents/"),
        methods: Methods::Only(&["PATCH", "PUT"]),
        kind: EventKind::AnnotationUpdated,
    },
    Rule {
        path: PathMatch::Prefix("/api/chat/"),
        methods: Methods::Any,
        kind: EventKind::FeatureUsed,
    },
    Rule {
        path: PathMatch::Exact(&["/auth/api/protected-endpoint/"]),
        methods: Methods::Only(&["GET"]),
        kind: EventKind::FeatureUsed,
    },
];

impl Rule {
    fn matches(&self, path: &str, method: &str) -> bool {
        let path_ok = match self.path {
            PathMatch::Exact(paths) => paths.contains(&path),
            PathMatch::Prefix(prefix) => path.starts_with(prefix),
        };
        path_ok
            && match self.methods {
                Methods::Any => true,
                Methods::Only(methods) => methods.contains(&method),
            }
    }
}

/// Maps a request shape to the event it represents, if any.
pub fn classify(path: &str, method: &Method) -> Option<EventKind> {
    let method = method.as_str();
    RULES
        .iter()
        .find(|rule| rule.matches(path, method))
        .map(|rule| rule.kind)
}
