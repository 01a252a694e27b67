use super::*;

#[test]
fn detects_languages_by_extension() {
    assert_eq!(Language::from_path(Path::new("src/App.java")), Language::Java);
    assert_eq!(Language::from_path(Path::new("web/index.tsx")), Language::TypeScript);
    assert_eq!(Language::from_path(Path::new("web/util.mjs")), Language::JavaScript);
    assert_eq!(Language::from_path(Path::new("tool/run.py")), Language::Python);
    assert_eq!(Language::from_path(Path::new("ci/deploy.YML")), Language::Yaml);
    assert_eq!(Language::from_path(Path::new("build.gradle")), Language::Gradle);
    assert_eq!(Language::from_path(Path::new("Makefile")), Language::Unknown);
}

#[test]
fn categories_follow_language() {
    assert_eq!(Language::Markdown.category(), Category::Documentation);
    assert_eq!(Language::Yaml.category(), Category::Documentation);
    assert_eq!(Language::Properties.category(), Category::Config);
    assert_eq!(Language::Toml.category(), Category::Config);
    assert_eq!(Language::Go.category(), Category::Code);
    assert_eq!(Language::Unknown.category(), Category::Code);
}

#[test]
fn names_parse_back() {
    for language in Language::ALL {
        assert_eq!(language.as_str().parse::<Language>(), Ok(language));
    }
    assert_eq!("Python".parse::<Language>(), Ok(Language::Python));
    assert!("cobol".parse::<Language>().is_err());
    assert_eq!("docs".parse::<Category>().ok(), None);
    assert_eq!("documentation".parse::<Category>(), Ok(Category::Documentation));
}
