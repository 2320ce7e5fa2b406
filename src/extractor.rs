//! Maps one product container to a [`Product`].
//!
//! Every scalar field is read through an ordered chain of [`Lookup`]
//! strategies built from the [`SelectorTable`]. The first strategy that
//! yields a value wins; if none does, the field stays absent and is later
//! persisted as the sentinel.

use log::{debug, error};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::Product;
use crate::platforms::SelectorTable;

const REVIEWS_PATTERN: &str = r"\((\d+)\)";

/// One way of reading a field out of a container.
pub trait Lookup: Send + Sync {
    fn lookup(&self, container: ElementRef<'_>) -> Option<String>;
}

pub fn compile(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|e| ScrapeError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

/// Collapsed, trimmed text content of an element.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Text of the first node matching a selector.
pub struct TextOf(pub Selector);

impl Lookup for TextOf {
    fn lookup(&self, container: ElementRef<'_>) -> Option<String> {
        container.select(&self.0).next().map(element_text).and_then(non_empty)
    }
}

/// `href` of the first matching link, resolved against the site base URL.
pub struct LinkOf {
    pub selector: Selector,
    pub base: Url,
}

impl Lookup for LinkOf {
    fn lookup(&self, container: ElementRef<'_>) -> Option<String> {
        let href = container.select(&self.selector).next()?.value().attr("href")?;
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        match self.base.join(href) {
            Ok(url) => Some(url.to_string()),
            Err(_) => Some(href.to_string()),
        }
    }
}

/// Image source read from attributes in priority order, skipping inline
/// `data:` placeholders.
pub struct ImageOf {
    pub selector: Selector,
    pub attrs: Vec<String>,
    pub lazy_marker: String,
    pub lazy_attr: String,
}

fn is_placeholder(value: &str) -> bool {
    value.trim_start().starts_with("data:")
}

impl Lookup for ImageOf {
    fn lookup(&self, container: ElementRef<'_>) -> Option<String> {
        let img = container.select(&self.selector).next()?;
        let el = img.value();

        let direct = self.attrs.iter().find_map(|attr| {
            el.attr(attr)
                .map(str::trim)
                .filter(|v| !v.is_empty() && !is_placeholder(v))
        });
        if let Some(url) = direct {
            return Some(url.to_string());
        }

        // Lazy-loaded images flag themselves with e.g. lazy="loading".
        if el.attr(&self.lazy_marker).is_some() {
            return el
                .attr(&self.lazy_attr)
                .map(str::trim)
                .filter(|v| !v.is_empty() && !is_placeholder(v))
                .map(str::to_string);
        }
        None
    }
}

/// Ordered fallback chain; the first strategy to produce a value wins.
#[derive(Default)]
pub struct FieldChain {
    lookups: Vec<Box<dyn Lookup>>,
}

impl FieldChain {
    pub fn new(lookups: Vec<Box<dyn Lookup>>) -> Self {
        Self { lookups }
    }

    fn texts(selectors: &[String]) -> Result<Self, ScrapeError> {
        let lookups = selectors
            .iter()
            .map(|s| Ok(Box::new(TextOf(compile(s)?)) as Box<dyn Lookup>))
            .collect::<Result<Vec<_>, ScrapeError>>()?;
        Ok(Self::new(lookups))
    }
}

impl Lookup for FieldChain {
    fn lookup(&self, container: ElementRef<'_>) -> Option<String> {
        self.lookups.iter().find_map(|l| l.lookup(container))
    }
}

/// Brand from a product title: first known brand contained in the title
/// (case-insensitive, list order), else the title's first word if it is
/// longer than one character.
pub fn brand_from_title(title: &str, known_brands: &[String]) -> Option<String> {
    let title_upper = title.to_uppercase();
    let known = known_brands
        .iter()
        .map(|b| b.trim().to_uppercase())
        .find(|b| !b.is_empty() && title_upper.contains(b.as_str()));
    if known.is_some() {
        return known;
    }

    let first_word = title.split_whitespace().next()?.to_uppercase();
    if first_word.chars().count() > 1 {
        Some(first_word)
    } else {
        None
    }
}

pub fn format_rating(filled: usize, total: usize) -> Option<String> {
    if total == 0 {
        None
    } else {
        Some(format!("{}/{}", filled, total))
    }
}

pub struct ProductExtractor {
    name: FieldChain,
    price: FieldChain,
    original_price: FieldChain,
    discount: FieldChain,
    product_url: FieldChain,
    image: FieldChain,
    reviews: FieldChain,
    shipping: FieldChain,
    rating_widget: Vec<Selector>,
    rating_filled: Selector,
    rating_item: Selector,
    badges: Selector,
    reviews_pattern: Regex,
    known_brands: Vec<String>,
    category: String,
}

impl ProductExtractor {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let base = Url::parse(&config.base_url)?;
        Self::from_table(
            &config.selectors,
            base,
            config.known_brands.clone(),
            config.category.clone(),
        )
    }

    pub fn from_table(
        table: &SelectorTable,
        base: Url,
        known_brands: Vec<String>,
        category: String,
    ) -> Result<Self, ScrapeError> {
        let product_url = table
            .product_link
            .iter()
            .map(|s| {
                Ok(Box::new(LinkOf {
                    selector: compile(s)?,
                    base: base.clone(),
                }) as Box<dyn Lookup>)
            })
            .collect::<Result<Vec<_>, ScrapeError>>()?;

        let image = table
            .image
            .iter()
            .map(|s| {
                Ok(Box::new(ImageOf {
                    selector: compile(s)?,
                    attrs: table.image_attrs.clone(),
                    lazy_marker: table.lazy_marker_attr.clone(),
                    lazy_attr: table.lazy_attr.clone(),
                }) as Box<dyn Lookup>)
            })
            .collect::<Result<Vec<_>, ScrapeError>>()?;

        Ok(Self {
            name: FieldChain::texts(&table.name)?,
            price: FieldChain::texts(&table.price)?,
            original_price: FieldChain::texts(&table.original_price)?,
            discount: FieldChain::texts(&table.discount)?,
            product_url: FieldChain::new(product_url),
            image: FieldChain::new(image),
            reviews: FieldChain::texts(&table.reviews)?,
            shipping: FieldChain::texts(&table.shipping)?,
            rating_widget: table
                .rating_widget
                .iter()
                .map(|s| compile(s))
                .collect::<Result<_, _>>()?,
            rating_filled: compile(&table.rating_filled)?,
            rating_item: compile(&table.rating_item)?,
            badges: compile(&table.badges)?,
            reviews_pattern: Regex::new(REVIEWS_PATTERN)?,
            known_brands,
            category,
        })
    }

    /// Parse a container's outer HTML and extract it.
    pub fn extract_fragment(&self, html: &str) -> Result<Product, ScrapeError> {
        let fragment = Html::parse_fragment(html);
        let container = fragment
            .root_element()
            .children()
            .find_map(ElementRef::wrap)
            .ok_or(ScrapeError::EmptyContainer)?;
        Ok(self.extract(container))
    }

    /// Like [`extract_fragment`](Self::extract_fragment) but logs and
    /// drops containers that cannot be read at all.
    pub fn try_extract(&self, html: &str) -> Option<Product> {
        match self.extract_fragment(html) {
            Ok(product) => Some(product),
            Err(e) => {
                error!("Error extracting product info: {}", e);
                None
            }
        }
    }

    pub fn extract(&self, container: ElementRef<'_>) -> Product {
        let name = self.name.lookup(container);
        let brand = name
            .as_deref()
            .and_then(|n| brand_from_title(n, &self.known_brands));

        let (rating, reviews_count) = self.rating_and_reviews(container);

        let product = Product {
            price: self.price.lookup(container),
            original_price: self.original_price.lookup(container),
            discount: self.discount.lookup(container),
            rating,
            reviews_count,
            image_url: self.image.lookup(container),
            product_url: self.product_url.lookup(container),
            brand,
            category: Some(self.category.clone()),
            shipping_info: self.shipping.lookup(container),
            badges: self.badges(container),
            name,
        };
        debug!("Extracted product: {:?}", product.name);
        product
    }

    /// Star rating and review count. Both come from the rating block, so
    /// a card without the widget has neither.
    fn rating_and_reviews(&self, container: ElementRef<'_>) -> (Option<String>, Option<String>) {
        let Some(widget) = self
            .rating_widget
            .iter()
            .find_map(|sel| container.select(sel).next())
        else {
            return (None, None);
        };
        let filled = widget.select(&self.rating_filled).count();
        let total = widget.select(&self.rating_item).count();

        let reviews = self.reviews.lookup(container).and_then(|text| {
            self.reviews_pattern
                .captures(&text)
                .map(|caps| format!("{} reviews", &caps[1]))
        });
        (format_rating(filled, total), reviews)
    }

    fn badges(&self, container: ElementRef<'_>) -> Vec<String> {
        container
            .select(&self.badges)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SENTINEL;

    fn extractor() -> ProductExtractor {
        ProductExtractor::new(&ScraperConfig::default()).unwrap()
    }

    const FULL_CARD: &str = r#"
        <div class="product-item">
          <a href="/listing/2001234-samsung-galaxy-a14">
            <div class="product-image"><img src="https://image.kilimall.com/a14.jpg"></div>
            <p class="product-title">  Samsung Galaxy A14 4GB+128GB  </p>
          </a>
          <div class="product-price">KSh 17,999</div>
          <div class="old-price">KSh 21,000</div>
          <span class="discount-tag">-14%</span>
          <div class="rate">
            <div class="van-rate">
              <i class="van-rate__item"><span class="van-rate__icon--full"></span></i>
              <i class="van-rate__item"><span class="van-rate__icon--full"></span></i>
              <i class="van-rate__item"><span class="van-rate__icon--full"></span></i>
              <i class="van-rate__item"><span class="van-rate__icon"></span></i>
              <i class="van-rate__item"><span class="van-rate__icon"></span></i>
            </div>
            <span class="reviews">(42)</span>
          </div>
          <div class="logistics-tag"><span class="tag-name">Shipped from abroad</span></div>
          <div class="mark-box"><div>Flash Sale</div><div>  </div><div>Official Store</div></div>
        </div>"#;

    #[test]
    fn reads_every_field_from_a_complete_card() {
        let product = extractor().extract_fragment(FULL_CARD).unwrap();

        assert_eq!(product.name.as_deref(), Some("Samsung Galaxy A14 4GB+128GB"));
        assert_eq!(product.price.as_deref(), Some("KSh 17,999"));
        assert_eq!(product.original_price.as_deref(), Some("KSh 21,000"));
        assert_eq!(product.discount.as_deref(), Some("-14%"));
        assert_eq!(product.rating.as_deref(), Some("3/5"));
        assert_eq!(product.reviews_count.as_deref(), Some("42 reviews"));
        assert_eq!(product.image_url.as_deref(), Some("https://image.kilimall.com/a14.jpg"));
        assert_eq!(
            product.product_url.as_deref(),
            Some("https://www.kilimall.co.ke/listing/2001234-samsung-galaxy-a14")
        );
        assert_eq!(product.brand.as_deref(), Some("SAMSUNG"));
        assert_eq!(product.category.as_deref(), Some("Electronics"));
        assert_eq!(product.shipping_info.as_deref(), Some("Shipped from abroad"));
        assert_eq!(product.badges, vec!["Flash Sale", "Official Store"]);
    }

    #[test]
    fn bare_card_yields_sentinels_without_failing() {
        let product = extractor()
            .extract_fragment(r#"<div class="product-item"><span>nothing here</span></div>"#)
            .unwrap();

        let value = serde_json::to_value(&product).unwrap();
        for field in [
            "name",
            "price",
            "original_price",
            "discount",
            "rating",
            "reviews_count",
            "image_url",
            "product_url",
            "brand",
            "shipping_info",
        ] {
            assert_eq!(value[field], SENTINEL, "field {field}");
        }
        assert!(product.badges.is_empty());
    }

    #[test]
    fn price_fields_are_independent() {
        let product = extractor()
            .extract_fragment(r#"<div><span class="discount">-30%</span></div>"#)
            .unwrap();

        assert_eq!(product.price, None);
        assert_eq!(product.original_price, None);
        assert_eq!(product.discount.as_deref(), Some("-30%"));
    }

    #[test]
    fn loose_selector_used_when_primary_missing() {
        let product = extractor()
            .extract_fragment(
                r#"<div><p class="card-title-text">Hisense 32" TV</p><s class="price-original">KSh 20,000</s></div>"#,
            )
            .unwrap();

        assert_eq!(product.name.as_deref(), Some("Hisense 32\" TV"));
        assert_eq!(product.original_price.as_deref(), Some("KSh 20,000"));
        assert_eq!(product.brand.as_deref(), Some("HISENSE"));
    }

    #[test]
    fn image_skips_inline_placeholders() {
        let ex = extractor();
        let placeholder = r#"<div class="product-image"><img src="data:image/gif;base64,R0lGOD" data-src="https://cdn.kilimall.com/real.jpg"></div>"#;
        assert_eq!(
            ex.extract_fragment(&format!("<div>{placeholder}</div>"))
                .unwrap()
                .image_url
                .as_deref(),
            Some("https://cdn.kilimall.com/real.jpg")
        );

        let lazy_only = r#"<div><div class="product-image"><img src="data:image/png;base64,AAAA" data-lazy-src="https://cdn.kilimall.com/lazy.jpg"></div></div>"#;
        assert_eq!(
            ex.extract_fragment(lazy_only).unwrap().image_url.as_deref(),
            Some("https://cdn.kilimall.com/lazy.jpg")
        );

        let all_placeholders = r#"<div><div class="product-image"><img src="data:image/png;base64,AAAA" lazy="loading" data-src="data:image/png;base64,BBBB"></div></div>"#;
        assert_eq!(ex.extract_fragment(all_placeholders).unwrap().image_url, None);
    }

    #[test]
    fn rating_without_items_is_absent() {
        let product = extractor()
            .extract_fragment(r#"<div><div class="rate"><div class="van-rate"></div></div></div>"#)
            .unwrap();
        assert_eq!(product.rating, None);
        assert_eq!(format_rating(3, 5).as_deref(), Some("3/5"));
        assert_eq!(format_rating(0, 0), None);
    }

    const EMPTY_WIDGET: &str = r#"<div class="rate"><div class="van-rate"></div></div>"#;

    #[test]
    fn reviews_need_parenthesised_number() {
        let ex = extractor();
        let no_number = ex
            .extract_fragment(&format!(
                r#"<div>{EMPTY_WIDGET}<span class="reviews">No reviews yet</span></div>"#
            ))
            .unwrap();
        assert_eq!(no_number.reviews_count, None);

        let with_text = ex
            .extract_fragment(&format!(
                r#"<div>{EMPTY_WIDGET}<span class="reviews">Rated (1,2) or (118) times</span></div>"#
            ))
            .unwrap();
        assert_eq!(with_text.reviews_count.as_deref(), Some("118 reviews"));
    }

    #[test]
    fn reviews_require_the_rating_widget() {
        let ex = extractor();
        let no_widget = ex
            .extract_fragment(r#"<div><span class="reviews">(42)</span></div>"#)
            .unwrap();
        assert_eq!(no_widget.rating, None);
        assert_eq!(no_widget.reviews_count, None);

        let summary_only = ex
            .extract_fragment(&format!(
                r#"<div>{EMPTY_WIDGET}<div class="review-summary">Top review (7)</div></div>"#
            ))
            .unwrap();
        assert_eq!(summary_only.reviews_count, None);
    }

    #[test]
    fn brand_rules() {
        let brands = crate::platforms::kilimall_brands();

        assert_eq!(brand_from_title("Samsung Galaxy A14", &brands).as_deref(), Some("SAMSUNG"));
        assert_eq!(brand_from_title("sAmSuNg galaxy a14", &brands).as_deref(), Some("SAMSUNG"));
        assert_eq!(brand_from_title("Zentek Wireless Mouse", &brands).as_deref(), Some("ZENTEK"));
        assert_eq!(brand_from_title("", &brands), None);
        assert_eq!(brand_from_title("X mouse pad", &brands), None);
        // list order decides when several brands appear
        assert_eq!(brand_from_title("Tecno case for Infinix", &brands).as_deref(), Some("INFINIX"));
    }

    #[test]
    fn fragment_without_element_is_an_error() {
        assert!(matches!(
            extractor().extract_fragment("just text"),
            Err(ScrapeError::EmptyContainer)
        ));
        assert!(extractor().try_extract("").is_none());
    }

    #[test]
    fn invalid_selector_rejected_at_construction() {
        let mut config = ScraperConfig::default();
        config.selectors.price = vec!["div[".into()];
        assert!(matches!(
            ProductExtractor::new(&config),
            Err(ScrapeError::InvalidSelector { .. })
        ));
    }
}
