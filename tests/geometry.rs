use cmcs_license_sync::remote::geometry::{
    extract_object_literal, geometry_from_page, normalize_literal, parse_geometry,
};
use cmcs_license_sync::remote::html::{input_value, script_blocks, tag_attribute};
use cmcs_license_sync::remote::page_count;
use cmcs_license_sync::{ErrorKind, ToolError};

const DETAIL_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <script src="/CMCS/bundles/jquery"></script>
  <script type="text/javascript">
    require(["esri/map"],function(f){var n=document.getElementById("map"),i={Id:4312,Code:"XV-004312",visible:!0,locked:!1,Geometry:{spatialReference:{wkid:4326},rings:[[[106.91,47.92],[107.05,47.92],[107.05,48.01],[106.91,47.92]]]}},e=new f(n,{basemap:"topo"});});
  </script>
</head>
<body><div id="map"></div></body>
</html>"#;

#[test]
fn literal_before_constructor_is_extracted() {
    let script = r#"i={"Id":7,"Geometry":{"rings":[[[106.9,47.9],[107.0,48.0]]]}},e=new f"#;

    let literal = extract_object_literal(script).expect("literal found");
    assert_eq!(
        literal,
        r#"{"Id":7,"Geometry":{"rings":[[[106.9,47.9],[107.0,48.0]]]}}"#
    );

    let payload = parse_geometry(literal).expect("literal parsed");
    assert_eq!(payload.license_id, 7);
    assert_eq!(payload.ring, vec![(106.9, 47.9), (107.0, 48.0)]);
}

#[test]
fn literal_running_to_end_of_script_is_extracted() {
    let script = "var a=1, i = {Id:8,Geometry:{rings:[[[100,40],[101,41]]]}};\n";

    let literal = extract_object_literal(script).expect("literal found");
    assert_eq!(literal, "{Id:8,Geometry:{rings:[[[100,40],[101,41]]]}}");

    let payload = parse_geometry(literal).expect("literal parsed");
    assert_eq!(payload.ring, vec![(100.0, 40.0), (101.0, 41.0)]);
}

#[test]
fn assignments_to_other_names_are_ignored() {
    assert_eq!(extract_object_literal("vari={a:1},e=new f"), None);
    assert_eq!(extract_object_literal("if(i==={a:1}){}"), None);
    assert_eq!(extract_object_literal("no assignment here"), None);
}

#[test]
fn minified_booleans_are_rewritten() {
    let normalized = normalize_literal("{active:!0,locked:!1};");

    assert!(normalized.contains("active: true"));
    assert!(normalized.contains("locked: false"));
    assert!(!normalized.ends_with(';'));
}

#[test]
fn normalization_leaves_strings_and_other_tokens_alone() {
    let normalized = normalize_literal(r#"{note:"ratio:!0",count:!10,flag: !1}"#);

    assert_eq!(normalized, r#"{note:"ratio:!0",count:!10,flag: false}"#);
}

#[test]
fn detail_page_yields_geometry_payload() {
    let payload = geometry_from_page(4312, DETAIL_PAGE).expect("geometry extracted");

    assert_eq!(payload.license_id, 4312);
    assert_eq!(payload.ring.len(), 4);
    assert_eq!(payload.ring[0], (106.91, 47.92));
    assert_eq!(payload.ring[2], (107.05, 48.01));
}

#[test]
fn string_id_is_accepted() {
    let payload = parse_geometry(r#"{Id:"55",Geometry:{rings:[[[1.5,2.5]]]}}"#)
        .expect("literal parsed");
    assert_eq!(payload.license_id, 55);
}

#[test]
fn page_without_geometry_reports_extraction_failure() {
    let error = geometry_from_page(9, "<html><body>Not found</body></html>")
        .expect_err("page without script rejected");
    assert!(matches!(
        error,
        ToolError::GeometryExtraction { license_id: 9, .. }
    ));
    assert_eq!(error.kind(), ErrorKind::GeometryExtraction);

    let error = geometry_from_page(
        9,
        r#"<script type="text/javascript">var x = 1;</script>"#,
    )
    .expect_err("script without literal rejected");
    assert!(error.to_string().contains("license 9"));
}

#[test]
fn malformed_literals_are_rejected() {
    assert!(parse_geometry("{Id:1,Geometry:{rings:[[[1,2]]]").is_err());
    assert!(parse_geometry("{Geometry:{rings:[[[1,2]]]}}").is_err());
    assert!(parse_geometry("{Id:1,Geometry:{rings:[]}}").is_err());
    assert!(parse_geometry("{Id:1,Geometry:{rings:[[]]}}").is_err());
    assert!(parse_geometry("{Id:1,Geometry:{rings:[[[1]]]}}").is_err());
}

#[test]
fn non_javascript_scripts_are_skipped() {
    let page = r#"<script type="text/template">i={Id:1,Geometry:{rings:[[[1,2]]]}},e=new f</script>"#;
    assert!(geometry_from_page(1, page).is_err());
}

#[test]
fn verification_token_is_read_from_login_form() {
    let page = r#"
        <form action="/CMCS/Account/Login" method="post">
          <INPUT name="__RequestVerificationToken" type="hidden" value="CfDJ8Nq-4x_abc&amp;def" />
          <input id="UserName" name="UserName" type="text" value="">
        </form>"#;

    assert_eq!(
        input_value(page, "__RequestVerificationToken").as_deref(),
        Some("CfDJ8Nq-4x_abc&def")
    );
    assert_eq!(input_value(page, "UserName").as_deref(), Some(""));
    assert_eq!(input_value(page, "Password"), None);
}

#[test]
fn tag_attributes_accept_all_quoting_styles() {
    let tag = r#"<input type=hidden name='token' value="a b" disabled>"#;

    assert_eq!(tag_attribute(tag, "type").as_deref(), Some("hidden"));
    assert_eq!(tag_attribute(tag, "NAME").as_deref(), Some("token"));
    assert_eq!(tag_attribute(tag, "value").as_deref(), Some("a b"));
    assert_eq!(tag_attribute(tag, "disabled").as_deref(), Some(""));
    assert_eq!(tag_attribute(tag, "id"), None);
}

#[test]
fn script_blocks_are_listed_in_document_order() {
    let blocks = script_blocks(DETAIL_PAGE);

    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].body.is_empty());
    assert!(blocks[1].is_javascript());
    assert!(blocks[1].body.contains("rings"));
}

#[test]
fn listing_pages_round_up() {
    assert_eq!(page_count(0), 0);
    assert_eq!(page_count(1), 1);
    assert_eq!(page_count(1000), 1);
    assert_eq!(page_count(1001), 2);
    assert_eq!(page_count(4321), 5);
}
