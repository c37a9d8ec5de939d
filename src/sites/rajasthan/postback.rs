//! ASP.NET WebForms postback state.

use scraper::{Html, Selector};

static VIEWSTATE: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("input#__VIEWSTATE").expect("Invalid selector"));
static VIEWSTATE_GENERATOR: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse("input#__VIEWSTATEGENERATOR").expect("Invalid selector")
});
static EVENT_VALIDATION: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse("input#__EVENTVALIDATION").expect("Invalid selector")
});
static VIEWSTATE_ENCRYPTED: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse("input#__VIEWSTATEENCRYPTED").expect("Invalid selector")
});

/// Name of the house drop-down on the proceedings page.
pub const HOUSE_FIELD: &str = "ctl00$ContentPlaceHolder1$DDLHouse";

/// Hidden form fields that must be echoed back with every postback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageState {
    pub viewstate: String,
    pub viewstate_generator: String,
    pub event_validation: String,
    pub viewstate_encrypted: String,
}

fn input_value(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(String::from)
}

impl PageState {
    /// Refresh from a page, keeping the previous value of any field the page omits.
    pub fn update(&mut self, html: &str) {
        let document = Html::parse_document(html);
        if let Some(v) = input_value(&document, &VIEWSTATE) {
            self.viewstate = v;
        }
        if let Some(v) = input_value(&document, &VIEWSTATE_GENERATOR) {
            self.viewstate_generator = v;
        }
        if let Some(v) = input_value(&document, &EVENT_VALIDATION) {
            self.event_validation = v;
        }
        if let Some(v) = input_value(&document, &VIEWSTATE_ENCRYPTED) {
            self.viewstate_encrypted = v;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.viewstate.is_empty()
    }

    /// Form body firing `event_target` with the given house selected.
    #[must_use]
    pub fn form(&self, event_target: &str, house: u32) -> Vec<(&'static str, String)> {
        vec![
            ("__EVENTTARGET", event_target.to_string()),
            ("__EVENTARGUMENT", String::new()),
            ("__LASTFOCUS", String::new()),
            ("__VIEWSTATE", self.viewstate.clone()),
            ("__VIEWSTATEGENERATOR", self.viewstate_generator.clone()),
            ("__VIEWSTATEENCRYPTED", self.viewstate_encrypted.clone()),
            ("__EVENTVALIDATION", self.event_validation.clone()),
            (HOUSE_FIELD, house.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_keeps_missing_fields() {
        let mut state = PageState::default();
        state.update(
            r#"<form>
                <input type="hidden" id="__VIEWSTATE" value="vs1" />
                <input type="hidden" id="__VIEWSTATEGENERATOR" value="gen" />
                <input type="hidden" id="__EVENTVALIDATION" value="ev1" />
            </form>"#,
        );
        assert_eq!(state.viewstate, "vs1");
        assert_eq!(state.viewstate_encrypted, "");

        state.update(r#"<input type="hidden" id="__VIEWSTATE" value="vs2" />"#);
        assert_eq!(state.viewstate, "vs2");
        assert_eq!(state.event_validation, "ev1");
        assert!(!state.is_empty());
    }

    #[test]
    fn test_form_fields() {
        let state = PageState {
            viewstate: "vs".into(),
            ..PageState::default()
        };
        let form = state.form("ctl00$x$LinkButton2", 7);
        assert_eq!(form[0], ("__EVENTTARGET", "ctl00$x$LinkButton2".to_string()));
        assert_eq!(form.last().unwrap(), &(HOUSE_FIELD, "7".to_string()));
    }
}
