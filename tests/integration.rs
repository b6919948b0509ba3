mod fixtures;

use bracken::{
    BrackenError, ChildOrValue, SourceMode, Template, Value, XmlTranslations,
};
use fixtures::{get_engine, write_file};

#[test]
#[ntest::timeout(100)]
fn test_basic_substitution() {
    let mut template = Template::parse("Hello [{replace name}]!", SourceMode::Plain).unwrap();
    template.set_value("name", "World");
    assert_eq!(
        template.render(),
        "Hello World!",
        "Rendered string should match the template."
    );
}

#[test]
#[ntest::timeout(100)]
fn test_condition_visibility() {
    let source = "[{if active == 'yes'}]Visible[{if active end}]";

    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    template.set_value("active", "yes");
    assert_eq!(template.render(), "Visible");

    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    template.set_value("active", "no");
    assert_eq!(template.render(), "", "a false condition renders nothing");
}

#[test]
#[ntest::timeout(100)]
fn test_repeater_capture_order() {
    let mut template = Template::parse(
        "[{repeater items}]-[{replace item}][{repeater items end}]",
        SourceMode::Plain,
    )
    .unwrap();
    let items = template.child("items").unwrap();
    for item in ["a", "b", "c"] {
        template.set_value_at(items, "item", item);
        template.capture(items).unwrap();
    }
    assert_eq!(template.render(), "-a-b-c");
}

#[test]
#[ntest::timeout(100)]
fn test_repeater_values_do_not_leak() {
    let mut template = Template::parse(
        "[{repeater rows}][{replace cell}];[{repeater rows end}]",
        SourceMode::Plain,
    )
    .unwrap();
    let rows = template.child("rows").unwrap();
    template.set_value_at(rows, "cell", "first");
    template.capture(rows).unwrap();
    // No value bound for the second repetition: the capture must have
    // cleared the first one.
    template.capture(rows).unwrap();
    assert_eq!(template.render(), "first;;");
}

#[test]
#[ntest::timeout(100)]
fn test_raw_flag_skips_escaping() {
    let mut template = Template::parse("[{replace raw_html raw}]", SourceMode::Plain).unwrap();
    template.set_value("raw_html", "<b>x</b>");
    assert_eq!(template.render(), "<b>x</b>");

    let mut template = Template::parse("[{replace raw_html}]", SourceMode::Plain).unwrap();
    template.set_value("raw_html", "<b>x</b>");
    assert_eq!(template.render(), "&lt;b&gt;x&lt;/b&gt;");
}

#[test]
#[ntest::timeout(100)]
fn test_escaping_covers_quotes_and_amp() {
    let mut template = Template::parse("[{replace v}]", SourceMode::Plain).unwrap();
    template.set_value("v", "a<b>\"c\"&d");
    assert_eq!(template.render(), "a&lt;b&gt;&quot;c&quot;&amp;d");
}

#[test]
#[ntest::timeout(100)]
fn test_duplicate_sibling_sections_fail_with_line() {
    let source = "line one\n[{section dup}]a[{section dup end}]\n[{section dup}]b[{section dup end}]";
    let err = Template::parse(source, SourceMode::Plain).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("dup"), "error should name the duplicate: {}", message);
    assert!(message.contains("on line 3"), "error should carry the line: {}", message);
}

#[test]
#[ntest::timeout(100)]
fn test_local_vs_ancestor_lookup() {
    let source = concat!(
        "[{section outer}][{section inner}]",
        "walk=[{replace x}] local=[{replace x local}]",
        "[{section inner end}][{section outer end}]",
    );
    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    // Bind "x" on the outer section only.
    let outer = template.child("outer").unwrap();
    template.set_value_at(outer, "x", "ancestor");
    assert_eq!(template.render(), "walk=ancestor local=");
}

#[test]
#[ntest::timeout(100)]
fn test_local_condition_ignores_ancestors() {
    let source = "[{section s}][{if x == 1 local}]seen[{if x end}][{section s end}]";
    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    template.set_value("x", 1i64);
    assert_eq!(template.render(), "", "a local condition must not see root values");

    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    let section = template.child("s").unwrap();
    template.set_value_at(section, "x", 1i64);
    assert_eq!(template.render(), "seen");
}

#[test]
#[ntest::timeout(100)]
fn test_membership_conditions() {
    let source = "[{if color in red green blue}]known[{if color end}]";
    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    template.set_value("color", "green");
    assert_eq!(template.render(), "known");

    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    template.set_value("color", "mauve");
    assert_eq!(template.render(), "");

    let source = "[{if color !in red green}]odd[{if color end}]";
    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    template.set_value("color", "mauve");
    assert_eq!(template.render(), "odd");
}

#[test]
#[ntest::timeout(100)]
fn test_numeric_comparisons() {
    let source = "[{if n > 10}]big[{if n end}][{if n lte 10}]small[{if n end}]";
    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    template.set_value("n", 11i64);
    assert_eq!(template.render(), "big");

    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    // Numeric strings compare numerically, not lexicographically.
    template.set_value("n", "9");
    assert_eq!(template.render(), "small");
}

#[test]
#[ntest::timeout(100)]
fn test_round_trip_idempotence_with_reset() {
    let source = concat!(
        "head [{replace title}] ",
        "[{if show == 1}]shown[{if show end}]",
        "[{repeater list}]i[{repeater list end}] tail",
    );
    let mut template = Template::parse(source, SourceMode::Plain).unwrap();
    let first = template.render();
    template.reset_template();
    let second = template.render();
    assert_eq!(first, second);
}

#[test]
#[ntest::timeout(100)]
fn test_html_mode_normalizes_text() {
    let mut template = Template::parse(
        "<p>\n    spaced   out\n</p>   [{replace x}]",
        SourceMode::Html,
    )
    .unwrap();
    template.set_value("x", "y");
    assert_eq!(template.render(), "<p> spaced out </p> y");
}

#[test]
#[ntest::timeout(100)]
fn test_component_option_precedence() {
    let engine = get_engine();
    let source = concat!(
        "[{component tag class Labeller}]",
        "[{config label is default_label}]",
        "[{replace label local}]",
        "[{component tag end}]",
    );
    let mut template = engine.parse_str(source, SourceMode::Plain).unwrap();
    assert_eq!(template.render(), "default_label");

    // A runtime option overrides the template-declared default...
    let tag = template.child("tag").unwrap();
    template.set_option(tag, "label", "runtime_label").unwrap();
    assert_eq!(template.render(), "runtime_label");

    // ...and clearing it (null) reveals the default again.
    template.set_option(tag, "label", Value::Null).unwrap();
    assert_eq!(template.render(), "default_label");

    // reset_template drops runtime options but keeps defaults.
    let mut template = engine.parse_str(source, SourceMode::Plain).unwrap();
    let tag = template.child("tag").unwrap();
    template.set_option(tag, "label", "runtime_label").unwrap();
    template.reset_template();
    assert_eq!(template.render(), "default_label");
}

#[test]
#[ntest::timeout(100)]
fn test_failing_component_renders_empty() {
    let engine = get_engine();
    let source = "before [{component b class Broken}]inner[{component b end}] after";
    let mut template = engine.parse_str(source, SourceMode::Plain).unwrap();
    assert_eq!(
        template.render(),
        "before  after",
        "a failing component must not poison the surrounding render"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_unknown_component_class_is_fatal_at_build() {
    let engine = get_engine();
    let err = engine
        .parse_str(
            "[{component x class NoSuchClass}]y[{component x end}]",
            SourceMode::Plain,
        )
        .unwrap_err();
    assert!(matches!(err, BrackenError::Build { .. }), "got: {:?}", err);
}

#[test]
#[ntest::timeout(1000)]
fn test_plain_include_reads_file_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "footer.txt", "(c) footer\n");
    let main = write_file(dir.path(), "page.tpl", "body [{include footer.txt}]");

    let engine = get_engine();
    let mut template = engine.load(&main, SourceMode::Plain).unwrap();
    assert_eq!(template.render(), "body (c) footer\n");
}

#[test]
#[ntest::timeout(1000)]
fn test_missing_include_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let main = write_file(dir.path(), "page.tpl", "[{include nowhere.txt}]");

    let engine = get_engine();
    let err = engine.load(&main, SourceMode::Plain).unwrap_err();
    assert!(matches!(err, BrackenError::Build { .. }), "got: {:?}", err);
}

#[test]
#[ntest::timeout(1000)]
fn test_template_include_wraps_in_named_section() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "side-bar.tpl", "[{replace item}]");
    let main = write_file(
        dir.path(),
        "page.tpl",
        "[{include template side-bar.tpl}][{include template side-bar.tpl as extra}]",
    );

    let engine = get_engine();
    let mut template = engine.load(&main, SourceMode::Plain).unwrap();
    // Unaliased: section name is the stem stripped of punctuation.
    let sidebar = template.child("sidebar").unwrap();
    template.set_value_at(sidebar, "item", "left");
    let extra = template.child("extra").unwrap();
    template.set_value_at(extra, "item", "right");
    assert_eq!(template.render(), "leftright");
}

#[test]
#[ntest::timeout(1000)]
fn test_component_include_builds_inline() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "widget.tpl",
        "[{component widget class Labeller}][{config label is boxed}][{replace label local}][{component widget end}]",
    );
    let main = write_file(
        dir.path(),
        "page.tpl",
        "[{include component widget.tpl as gadget}]",
    );

    let engine = get_engine();
    let mut template = engine.load(&main, SourceMode::Plain).unwrap();
    // The alias rewrote the component's name token; no wrapping section
    // exists around it.
    assert!(template.child("widget").is_err());
    assert!(template.child("gadget").is_ok());
    assert_eq!(template.render(), "boxed");
}

#[test]
#[ntest::timeout(1000)]
fn test_component_include_rejects_extra_content() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "widget.tpl",
        "[{component widget class Labeller}]x[{component widget end}]trailing",
    );
    let main = write_file(dir.path(), "page.tpl", "[{include component widget.tpl}]");

    let engine = get_engine();
    let err = engine.load(&main, SourceMode::Plain).unwrap_err();
    assert!(matches!(err, BrackenError::Build { .. }), "got: {:?}", err);
}

#[test]
#[ntest::timeout(1000)]
fn test_localized_template_substitutes_before_parsing() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "page.xml",
        r#"<translations default="en">
             <locale name="en"><entry key="GREETING">Hello %1!</entry></locale>
             <locale name="de"><entry key="GREETING">Hallo %1!</entry></locale>
           </translations>"#,
    );
    let main = write_file(dir.path(), "page.tpl", "[{GREETING}]");

    let engine = get_engine().with_translations(XmlTranslations, "de");
    let mut template = engine.load(&main, SourceMode::Plain).unwrap();
    assert!(template.is_localized());
    template.set_value("arg1", "Welt");
    assert_eq!(template.render(), "Hallo Welt!");

    // An unknown locale falls back to the catalogue's default.
    let engine = get_engine().with_translations(XmlTranslations, "fr");
    let mut template = engine.load(&main, SourceMode::Plain).unwrap();
    template.set_value("arg1", "World");
    assert_eq!(template.render(), "Hello World!");
}

#[test]
#[ntest::timeout(1000)]
fn test_template_without_catalogue_parses_plain() {
    let dir = tempfile::tempdir().unwrap();
    let main = write_file(dir.path(), "page.tpl", "plain [{replace x}]");

    let engine = get_engine().with_translations(XmlTranslations, "de");
    let mut template = engine.load(&main, SourceMode::Plain).unwrap();
    assert!(!template.is_localized());
    template.set_value("x", "text");
    assert_eq!(template.render(), "plain text");
}

#[test]
#[ntest::timeout(100)]
fn test_child_or_value_two_step() {
    let mut template =
        Template::parse("[{section banner}]old[{section banner end}]", SourceMode::Plain).unwrap();
    match template.get_child_or_value("banner") {
        ChildOrValue::Child(_) => {}
        other => panic!("expected a named child, got {:?}", other),
    }
    template.set_child_or_value("banner", "new").unwrap();
    template.set_child_or_value("missing", 7i64).unwrap();
    assert_eq!(template.render(), "new");
    assert_eq!(
        template.get_child_or_value("missing"),
        ChildOrValue::Value(Some(Value::Int(7)))
    );
}

#[test]
#[ntest::timeout(100)]
fn test_node_not_found_is_recoverable() {
    let mut template = Template::parse("x", SourceMode::Plain).unwrap();
    let err = template.child("ghost").unwrap_err();
    assert!(matches!(err, BrackenError::NodeNotFound { .. }));
    // The template keeps working after the failed lookup.
    assert_eq!(template.render(), "x");
}

#[test]
#[ntest::timeout(100)]
fn test_comment_wrapped_directives() {
    let mut template = Template::parse(
        "<!-- [{replace a}] -->/* [{replace b}] */",
        SourceMode::Plain,
    )
    .unwrap();
    template.set_value("a", "1");
    template.set_value("b", "2");
    assert_eq!(template.render(), "12");
}
