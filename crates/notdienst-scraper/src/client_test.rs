use super::*;

fn test_client(base_uri: &str) -> ScrapeClient {
    ScrapeClient::new(ScrapeConfig {
        base_uri: base_uri.to_string(),
        search_uri: format!("{base_uri}/apotheke/notdienstsuche"),
        token_file_pattern: Regex::new(r"/typo3temp/assets/compressed/pharmacymap-\w+?\.js")
            .unwrap(),
        token_pattern: Regex::new(r"randomToken\s*=\s*'(\w+)'").unwrap(),
        timeout_secs: 5,
        user_agent: "notdienst-test/0.1".to_string(),
    })
    .expect("client construction should not fail")
}

#[test]
fn search_url_contains_fixed_and_request_parameters() {
    let client = test_client("https://www.aponet.de");
    let params = SearchParameters::new(51.9117, 8.8394, 1);
    let url = client.search_url(&params, &AccessToken::new("abc123"));
    assert_eq!(
        url,
        "https://www.aponet.de/apotheke/notdienstsuche\
         ?tx_aponetpharmacy_search[action]=result\
         &tx_aponetpharmacy_search[controller]=Search\
         &tx_aponetpharmacy_search[search][lat]=51.9117\
         &tx_aponetpharmacy_search[search][lng]=8.8394\
         &tx_aponetpharmacy_search[search][radius]=0\
         &tx_aponetpharmacy_search[token]=abc123\
         &type=1981"
    );
}

#[test]
fn search_url_percent_encodes_token() {
    let client = test_client("https://www.aponet.de");
    let params = SearchParameters::new(50.0, 7.5, 1);
    let url = client.search_url(&params, &AccessToken::new("a+b/c=d"));
    assert!(
        url.contains("[token]=a%2Bb%2Fc%3Dd&"),
        "token should be percent-encoded: {url}"
    );
}

#[test]
fn search_url_writes_negative_coordinates_verbatim() {
    let client = test_client("https://www.aponet.de");
    let params = SearchParameters::new(-33.5, -70.25, 1);
    let url = client.search_url(&params, &AccessToken::new("t"));
    assert!(url.contains("[lat]=-33.5&"), "{url}");
    assert!(url.contains("[lng]=-70.25&"), "{url}");
}

#[test]
fn token_file_uri_joins_relative_reference() {
    let client = test_client("https://www.aponet.de");
    assert_eq!(
        client.token_file_uri("/typo3temp/assets/compressed/pharmacymap-1.js"),
        "https://www.aponet.de/typo3temp/assets/compressed/pharmacymap-1.js"
    );
}

#[test]
fn token_file_uri_keeps_absolute_reference() {
    let client = test_client("https://www.aponet.de");
    assert_eq!(
        client.token_file_uri("https://cdn.aponet.de/pharmacymap-1.js"),
        "https://cdn.aponet.de/pharmacymap-1.js"
    );
}
