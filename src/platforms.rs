use serde::Deserialize;

// Kilimall Kenya listing pages are rendered client-side by Vue; every
// selector below targets the hydrated DOM.
pub const KILIMALL_BASE_URL: &str = "https://www.kilimall.co.ke";
pub const KILIMALL_CATEGORY: &str = "Electronics";

pub const KILIMALL_BRANDS: &[&str] = &[
    "VITRON", "SAMSUNG", "XIAOMI", "INFINIX", "TECNO", "ITEL", "OPPO", "REALME", "TAGWOOD",
    "HISENSE", "TCL", "SONAR", "AILYONS", "AMTEC", "GENERIC", "NOKIA", "HUAWEI", "APPLE",
    "ONEPLUS", "POCO", "BLACKVIEW", "RAMTONS",
];

/// CSS selectors for one storefront. Each scalar field holds an ordered
/// fallback chain: the primary selector first, looser matches after it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorTable {
    pub product_list: String,
    pub product_containers: String,
    pub name: Vec<String>,
    pub price: Vec<String>,
    pub original_price: Vec<String>,
    pub discount: Vec<String>,
    pub product_link: Vec<String>,
    pub image: Vec<String>,
    pub image_attrs: Vec<String>,
    pub lazy_marker_attr: String,
    pub lazy_attr: String,
    pub rating_widget: Vec<String>,
    pub rating_filled: String,
    pub rating_item: String,
    pub reviews: Vec<String>,
    pub shipping: Vec<String>,
    pub badges: String,
}

fn chain(selectors: &[&str]) -> Vec<String> {
    selectors.iter().map(|s| s.to_string()).collect()
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self {
            product_list: ".listings".into(),
            product_containers: ".listing-item .product-item".into(),
            name: chain(&[".product-title", "[class*=\"title\"]"]),
            price: chain(&[".product-price", ".price"]),
            original_price: chain(&[
                ".old-price",
                ".original-price",
                "[class*=\"old\"]",
                "[class*=\"original\"]",
            ]),
            discount: chain(&[
                ".discount",
                ".discount-tag",
                "[class*=\"discount\"]",
                ".percentage-off",
            ]),
            product_link: chain(&["a[href*=\"/listing/\"]", "a[href]"]),
            image: chain(&[".product-image img", "img"]),
            image_attrs: chain(&["src", "data-src", "data-lazy-src"]),
            lazy_marker_attr: "lazy".into(),
            lazy_attr: "data-src".into(),
            rating_widget: chain(&[".rate .van-rate", ".van-rate"]),
            rating_filled: ".van-rate__icon--full".into(),
            rating_item: ".van-rate__item".into(),
            reviews: chain(&[".reviews"]),
            shipping: chain(&[".logistics-tag .tag-name", "[class*=\"logistics\"]"]),
            badges: ".mark-box > div".into(),
        }
    }
}

pub fn kilimall_brands() -> Vec<String> {
    KILIMALL_BRANDS.iter().map(|b| b.to_string()).collect()
}
